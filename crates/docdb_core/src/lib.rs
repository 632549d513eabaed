//! # docdb_core
//!
//! Core engine for a transactional document database: pessimistic locking
//! with deadlock detection, WAL-backed durability and crash recovery,
//! hand-rolled B+ tree secondary indexes, unique-constraint validation, and
//! a MongoDB-flavoured query executor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Database                          │
//! │   (public facade: open, close, execute, execute_batch)│
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │  TransactionManager ──── LockManager (wait-for graph) │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │   WalWriter ── CheckpointManager ── RecoveryManager   │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │   DocumentValidator (`_id` uniqueness)                │
//! │   IndexManager (secondary B+ tree indexes)            │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │           docdb_storage::Layout (on-disk JSON)        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! - **Pessimistic locking**: readers and writers take locks before acting;
//!   a cycle in the wait-for graph is rejected as a deadlock rather than
//!   left to block forever.
//! - **WAL-first**: every mutation is logged before it is visible, and
//!   periodic checkpoints bound how much of the log recovery must replay.
//! - **No partial mutation**: a failed operation or batch never leaves a
//!   collection or its unique index in an intermediate state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use docdb_core::{Config, Database};
//!
//! let db = Database::open("./data", Config::default())?;
//! db.create_database("shop")?;
//! db.create_collection("shop", "users")?;
//! db.execute_query("shop", "db.users.insert({name: 'Ada'})")?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod error;
mod executor;
mod index;
mod lock;
mod query;
mod recovery;
mod transaction;
mod types;
mod validator;
mod wal;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointedTransaction};
pub use config::Config;
pub use error::{CoreError, CoreResult, LockDenied};
pub use executor::{Database, ExecResult};
pub use index::{BPlusTree, IndexManager, UniqueIndex};
pub use lock::{HeldLock, LockKey, LockManager, LockMode, Waiter};
pub use query::{matches, matches_equality, parse, split_statements, Operation};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use transaction::{IsolationLevel, Transaction, TransactionManager, TransactionState};
pub use types::{DocId, TransactionId};
pub use validator::DocumentValidator;
pub use wal::{WalRecord, WalWriter};
