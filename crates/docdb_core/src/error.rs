//! Error types for the document-database core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
///
/// Every variant corresponds to one of the `(ok: false, message)` kinds the
/// executor surfaces to callers; `Display` renders the exact message text
/// callers should see.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage-layer error (I/O, JSON, missing path).
    #[error("{0}")]
    Storage(#[from] docdb_storage::StorageError),

    /// A JSON value failed to parse or did not match the expected shape.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// A database or collection name failed validation.
    #[error("{0}")]
    InvalidName(String),

    /// A database or collection does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A database, collection, or index already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// A query string did not match the expected grammar.
    #[error("{0}")]
    ParseError(String),

    /// A document failed validation (missing/duplicate `_id`, unique
    /// constraint violation).
    #[error("{0}")]
    ValidationError(String),

    /// A lock could not be granted.
    #[error("{0}")]
    LockDenied(#[from] LockDenied),

    /// An operation was attempted on a transaction that was not ACTIVE.
    #[error("{0}")]
    TransactionState(String),

    /// A statement within a batch failed or the batch timed out.
    #[error("{0}")]
    BatchError(String),
}

impl CoreError {
    /// Builds an `InvalidName` error.
    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::InvalidName(message.into())
    }

    /// Builds a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Builds an `AlreadyExists` error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    /// Builds a `ParseError`.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError(message.into())
    }

    /// Builds a `ValidationError`.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Builds a `TransactionState` error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState(message.into())
    }

    /// Builds a `BatchError` citing the 1-based statement index.
    pub fn batch_error(index: usize, message: impl Into<String>) -> Self {
        Self::BatchError(format!("Query {index} failed: {}", message.into()))
    }

    /// Returns the message text as callers see it, without the `Err(...)`
    /// wrapping — this is what gets placed into the `(ok: false, message)`
    /// pair at the API boundary.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Reasons a lock acquisition can be denied.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockDenied {
    /// Granting the lock would close a cycle in the wait-for graph.
    #[error("Deadlock detected")]
    Deadlock,

    /// The acquire was queued behind other waiters rather than granted.
    #[error("Lock acquisition failed - waiting")]
    Waiting,

    /// The waiter queue for this key is full.
    #[error("waiting queue full")]
    WaitingQueueFull,

    /// The caller's wait exceeded `lock_timeout`.
    #[error("lock acquisition timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_message_matches_spec_text() {
        let err: CoreError = LockDenied::Deadlock.into();
        assert_eq!(err.message(), "Deadlock detected");
    }

    #[test]
    fn batch_error_cites_one_based_index() {
        let err = CoreError::batch_error(2, "Duplicate value for unique field '_id'");
        assert_eq!(
            err.message(),
            "Query 2 failed: Duplicate value for unique field '_id'"
        );
    }
}
