//! Pessimistic lock manager with wait-for-graph deadlock detection.
//!
//! Locks are granted on `(db, collection, doc_id)` keys in one of two modes,
//! shared (`READ`) or exclusive (`WRITE`). Unlike a blocking lock manager,
//! `acquire` never suspends the caller: a contended acquire either grants
//! immediately, is refused with "Deadlock detected", or is queued and
//! reported as `(false, "waiting")` for the caller to handle (§5).

mod manager;
mod types;

pub use manager::LockManager;
pub use types::{HeldLock, LockKey, LockMode, Waiter};
