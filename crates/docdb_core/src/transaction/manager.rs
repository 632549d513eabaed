//! Transaction table: begin/commit/abort, lock acquisition, and WAL logging.

use super::state::{IsolationLevel, Transaction, TransactionState};
use crate::config::Config;
use crate::error::{CoreError, CoreResult, LockDenied};
use crate::lock::{LockKey, LockManager, LockMode};
use crate::types::TransactionId;
use crate::wal::{WalRecord, WalWriter};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Coordinates the transaction table, the lock manager, and the WAL.
///
/// Every mutation an operation makes goes through `acquire_lock` (blocking
/// progress until the key is free or a deadlock is detected) and
/// `log_operation` (recording before/after document state) before
/// `commit`/`abort` releases the transaction's locks.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    wal: Arc<WalWriter>,
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
}

impl TransactionManager {
    /// Builds a transaction manager over an existing lock manager and WAL
    /// writer.
    #[must_use]
    pub fn new(config: &Config, wal: Arc<WalWriter>) -> Self {
        Self {
            lock_manager: Arc::new(LockManager::new(config.lock_timeout)),
            wal,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the lock manager this transaction manager drives, so callers
    /// (e.g. the checkpoint thread) can inspect lock state without going
    /// through a transaction.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begins a new, `ACTIVE` transaction and returns its id.
    pub fn begin(&self, isolation: IsolationLevel) -> TransactionId {
        let txn = Transaction::begin(isolation);
        let id = txn.id;
        self.transactions.lock().insert(id, txn);
        id
    }

    /// Returns a snapshot of one transaction's bookkeeping, if it exists.
    #[must_use]
    pub fn transaction(&self, txn: TransactionId) -> Option<Transaction> {
        self.transactions.lock().get(&txn).cloned()
    }

    /// Returns a transaction's current state.
    #[must_use]
    pub fn state(&self, txn: TransactionId) -> Option<TransactionState> {
        self.transactions.lock().get(&txn).map(|t| t.state)
    }

    /// Returns every transaction currently `ACTIVE`, for checkpoint capture.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<Transaction> {
        self.transactions
            .lock()
            .values()
            .filter(|t| t.state == TransactionState::Active)
            .cloned()
            .collect()
    }

    /// Attempts to acquire `mode` on `(db, collection, doc_id)` for `txn`.
    ///
    /// Requires `txn` to currently be `ACTIVE`. A denied-as-waiting result
    /// transitions `txn` to `BLOCKED` (the caller almost always follows this
    /// with [`abort`](Self::abort), since this manager never retries a
    /// queued wait on its own — see §5 "no blocking wait").
    pub fn acquire_lock(
        &self,
        txn: TransactionId,
        db: &str,
        collection: &str,
        doc_id: &str,
        mode: LockMode,
    ) -> CoreResult<()> {
        let isolation = {
            let mut table = self.transactions.lock();
            let entry = table
                .get_mut(&txn)
                .ok_or_else(|| CoreError::transaction_state("Transaction not found"))?;
            if entry.state != TransactionState::Active {
                return Err(CoreError::transaction_state(format!(
                    "Transaction is {}",
                    entry.state
                )));
            }
            entry.isolation
        };

        let key = LockKey::new(db, collection, doc_id);
        match self.lock_manager.acquire(key.clone(), mode, txn, isolation) {
            Ok(()) => {
                if let Some(entry) = self.transactions.lock().get_mut(&txn) {
                    entry.locks.insert(key);
                }
                Ok(())
            }
            Err(LockDenied::Waiting) => {
                if let Some(entry) = self.transactions.lock().get_mut(&txn) {
                    entry.state = TransactionState::Blocked;
                }
                Err(LockDenied::Waiting.into())
            }
            Err(denied) => Err(denied.into()),
        }
    }

    /// Appends one operation record to `db`'s write-ahead log.
    #[allow(clippy::too_many_arguments)]
    pub fn log_operation(
        &self,
        txn: TransactionId,
        operation: &str,
        db: &str,
        collection: Option<String>,
        doc_id: Option<String>,
        before_state: Option<Value>,
        after_state: Option<Value>,
    ) -> CoreResult<()> {
        let isolation = self
            .transactions
            .lock()
            .get(&txn)
            .ok_or_else(|| CoreError::transaction_state("Transaction not found"))?
            .isolation;

        let record = WalRecord::new(
            txn,
            operation,
            db,
            collection,
            doc_id,
            before_state,
            after_state,
            isolation,
        );
        self.wal.append(db, &record)
    }

    /// Commits `txn`: releases its locks and marks it `COMMITTED`.
    ///
    /// Fails if `txn` is not currently `ACTIVE` (including `BLOCKED`, which
    /// must be aborted rather than committed).
    pub fn commit(&self, txn: TransactionId) -> CoreResult<()> {
        self.finish(txn, TransactionState::Committed)
    }

    /// Aborts `txn`: releases its locks and marks it `ABORTED`.
    pub fn abort(&self, txn: TransactionId) -> CoreResult<()> {
        self.finish(txn, TransactionState::Aborted)
    }

    fn finish(&self, txn: TransactionId, target: TransactionState) -> CoreResult<()> {
        {
            let mut table = self.transactions.lock();
            let entry = table
                .get_mut(&txn)
                .ok_or_else(|| CoreError::transaction_state("Transaction not found"))?;
            if entry.state.is_terminal() {
                return Err(CoreError::transaction_state(format!(
                    "Transaction is {}",
                    entry.state
                )));
            }
            entry.state = target;
            entry.end_time = Some(SystemTime::now());
        }
        self.lock_manager.release_all(txn);
        Ok(())
    }
}
