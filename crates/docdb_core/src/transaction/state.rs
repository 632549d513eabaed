//! Transaction state machine and isolation levels.

use crate::lock::LockKey;
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;

/// Lifecycle state of a transaction.
///
/// `ACTIVE → {COMMITTED, ABORTED, BLOCKED}`; `BLOCKED → {ACTIVE, ABORTED}`.
/// `COMMITTED` and `ABORTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// The transaction may acquire locks and log operations.
    Active,
    /// The transaction committed; its locks have been released.
    Committed,
    /// The transaction aborted; its locks have been released.
    Aborted,
    /// The transaction's most recent lock acquire was denied and queued.
    Blocked,
}

impl TransactionState {
    /// Returns whether this state is terminal (no further transitions
    /// permitted).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// Isolation level requested for a transaction.
///
/// These are advisory tags carried on locks and WAL records (§5); the lock
/// manager enforces strict two-phase locking regardless of which level is
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Recognised but behaves identically to `ReadCommitted` under strict
    /// 2PL.
    ReadUncommitted,
    /// Same enforcement as the other levels; weaker contract promise only.
    ReadCommitted,
    /// Behaves identically to `Serializable` under pessimistic locking.
    RepeatableRead,
    /// Every touched document is locked before any write, held until
    /// commit.
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
        };
        write!(f, "{s}")
    }
}

/// In-memory bookkeeping for one transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Unique identifier.
    pub id: TransactionId,
    /// Current lifecycle state.
    pub state: TransactionState,
    /// Requested isolation level.
    pub isolation: IsolationLevel,
    /// When the transaction began.
    pub start_time: SystemTime,
    /// When the transaction reached a terminal state.
    pub end_time: Option<SystemTime>,
    /// Lock keys currently held by this transaction.
    pub locks: HashSet<LockKey>,
}

impl Transaction {
    /// Begins a new, ACTIVE transaction.
    #[must_use]
    pub fn begin(isolation: IsolationLevel) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            isolation,
            start_time: SystemTime::now(),
            end_time: None,
            locks: HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
        assert!(!TransactionState::Blocked.is_terminal());
    }

    #[test]
    fn isolation_level_display_matches_source_strings() {
        assert_eq!(IsolationLevel::ReadUncommitted.to_string(), "read_uncommitted");
        assert_eq!(IsolationLevel::Serializable.to_string(), "serializable");
    }

    #[test]
    fn begin_starts_active() {
        let txn = Transaction::begin(IsolationLevel::Serializable);
        assert_eq!(txn.state, TransactionState::Active);
        assert!(txn.locks.is_empty());
    }
}
