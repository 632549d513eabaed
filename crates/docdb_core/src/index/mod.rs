//! Secondary indexes: a B+ tree per indexed field, plus unique-constraint
//! enforcement.
//!
//! Indexes are internal access paths maintained by the executor as it
//! mutates documents — callers never reference an index by name in a
//! query, only by the field(s) it was declared on.

mod btree;
mod persistence;
mod unique;

pub use btree::BPlusTree;
pub use persistence::IndexManager;
pub use unique::UniqueIndex;
