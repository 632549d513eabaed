//! The structured operation the executor actually consumes.
//!
//! This is the entry point direct callers use; the lenient string
//! [`parser`](super::parser) is a convenience layer that produces one of
//! these from a `db.C.op(...)` query string.

use serde_json::Value;

/// One request to the query executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `db.C.find({...})` — selector dict, empty matches every document.
    Find { collection: String, selector: Value },
    /// `db.C.insert({...})` — a single document.
    Insert { collection: String, document: Value },
    /// `db.C.insertMany([{...}, ...])` — all-or-nothing.
    InsertMany { collection: String, documents: Vec<Value> },
    /// `db.C.update({query}, {update})` — `update` may hold `$set`.
    Update { collection: String, query: Value, update: Value },
    /// `db.C.delete({...})` — selector dict, empty matches every document.
    Delete { collection: String, selector: Value },
    /// `db.C.createCollection()`.
    CreateCollection { collection: String },
    /// `db.C.createIndex({field: 1})`.
    CreateIndex { collection: String, field: String },
    /// `db.C.dropIndex("field")`.
    DropIndex { collection: String, field: String },
}

impl Operation {
    /// The collection this operation targets.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Find { collection, .. }
            | Self::Insert { collection, .. }
            | Self::InsertMany { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::CreateCollection { collection }
            | Self::CreateIndex { collection, .. }
            | Self::DropIndex { collection, .. } => collection,
        }
    }
}
