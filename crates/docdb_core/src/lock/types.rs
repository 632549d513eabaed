//! Lock table value types.

use crate::transaction::IsolationLevel;
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// The mode a lock is held or requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared lock; multiple same-txn readers are fine, writers block.
    Read,
    /// Exclusive lock; at most one holder.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
        };
        write!(f, "{s}")
    }
}

/// Identifies the resource a lock protects: one document within one
/// collection within one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub collection: String,
    /// Document id.
    pub doc_id: String,
}

impl LockKey {
    /// Builds a new lock key.
    pub fn new(db: impl Into<String>, collection: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.db, self.collection, self.doc_id)
    }
}

/// The lock table entry for a currently-held lock.
#[derive(Debug, Clone)]
pub struct HeldLock {
    /// Lock mode held.
    pub mode: LockMode,
    /// Holding transaction.
    pub txn: TransactionId,
    /// When the lock was granted.
    pub acquired_at: Instant,
    /// Isolation level the holder requested.
    pub isolation: IsolationLevel,
}

/// A queued request for a lock that could not be granted immediately.
#[derive(Debug, Clone)]
pub struct Waiter {
    /// Waiting transaction.
    pub txn: TransactionId,
    /// Mode requested.
    pub mode: LockMode,
    /// When the wait began, used to prune stale waiters (§4.1).
    pub enqueued_at: Instant,
}
