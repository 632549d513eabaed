//! # docdb storage
//!
//! Directory-layout and JSON file I/O for docdb's on-disk format.
//!
//! This crate owns the concrete file tree: databases are directories,
//! collections are JSON array files, indexes and the write-ahead log live in
//! well-known subdirectories. Unlike an opaque byte-store abstraction, this
//! layer interprets enough of the format to create, validate, and read back
//! those files; `docdb_core` builds the transactional semantics on top.
//!
//! ## Example
//!
//! ```rust
//! use docdb_storage::Layout;
//! use tempfile::TempDir;
//!
//! let dir = TempDir::new().unwrap();
//! let layout = Layout::new(dir.path()).unwrap();
//! layout.create_database("shop").unwrap();
//! layout.create_collection_file("shop", "users").unwrap();
//! assert!(layout.load_collection("shop", "users").unwrap().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod layout;

pub use error::{StorageError, StorageResult};
pub use layout::{Layout, CHECKPOINTS_DIR, RESERVED_DIR_NAMES, TRANSACTION_LOGS_DIR};
