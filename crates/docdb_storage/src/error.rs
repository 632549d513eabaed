//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored JSON file failed to parse.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A name failed validation (did not start with a letter, or contained
    /// characters outside letters, digits and underscore).
    #[error("invalid name: {0}")]
    InvalidName(String),
}
