//! Query parsing and matching: turning a `db.C.op(...)` string into a
//! structured [`Operation`], and evaluating MongoDB-flavoured selectors
//! against documents.

mod matcher;
mod operation;
mod parser;

pub use matcher::{matches, matches_equality};
pub use operation::Operation;
pub use parser::{parse, split_statements};
