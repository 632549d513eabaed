//! Transaction lifecycle: pessimistic two-phase locking over a WAL.
//!
//! A transaction is `BEGIN`-ed at an isolation level, acquires document
//! locks as it touches data, logs each operation to the write-ahead log,
//! and ends in `COMMIT` or `ABORT`. There is no MVCC snapshotting: isolation
//! is achieved purely through strict 2PL (§5).

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{IsolationLevel, Transaction, TransactionState};
