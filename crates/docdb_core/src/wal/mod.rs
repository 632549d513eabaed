//! Write-ahead log for durability and crash recovery.
//!
//! One log file per database, `transaction_logs/<db>_transactions.log`, each
//! line a JSON-encoded [`WalRecord`] (§4.3). Every operation is logged
//! before it is applied to the collection file, so recovery can always tell
//! what a transaction intended even if it crashed mid-operation.
//!
//! ## Invariants
//!
//! - The log is **append-only** during normal operation; [`WalWriter::compact`]
//!   only runs at checkpoint time and replaces the file atomically.
//! - Recovery (`crate::recovery`) undoes uncommitted transactions and redoes
//!   committed ones using `before_state`/`after_state` snapshots.

mod record;
mod writer;

pub use record::WalRecord;
pub use writer::WalWriter;
