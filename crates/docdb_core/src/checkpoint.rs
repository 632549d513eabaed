//! Periodic checkpointing and WAL compaction.
//!
//! A checkpoint snapshots which transactions were active at a point in
//! time; recovery uses that snapshot to decide which WAL entries since the
//! checkpoint belong to a transaction that must be undone versus one that
//! had already committed and should be redone (§4.3).

use crate::lock::LockKey;
use crate::transaction::{IsolationLevel, TransactionManager};
use crate::types::TransactionId;
use chrono::{DateTime, Utc};
use docdb_storage::Layout;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One transaction's bookkeeping as captured at checkpoint time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointedTransaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Isolation level it was running under.
    pub isolation: IsolationLevel,
    /// When it began, as recorded by the checkpoint.
    pub start_time: DateTime<Utc>,
    /// Lock keys it held at the time the checkpoint was taken.
    pub locks: Vec<LockKey>,
}

/// A point-in-time snapshot of the set of active transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// When the checkpoint was taken.
    pub timestamp: DateTime<Utc>,
    /// Transactions that were `ACTIVE` at `timestamp`.
    pub active_transactions: Vec<CheckpointedTransaction>,
}

/// Creates checkpoints, prunes old ones, and compacts per-database WALs.
pub struct CheckpointManager {
    layout: Arc<Layout>,
    transactions: Arc<TransactionManager>,
    wal: Arc<crate::wal::WalWriter>,
    retention: usize,
}

impl CheckpointManager {
    /// Builds a checkpoint manager retaining the newest `retention`
    /// checkpoint files.
    #[must_use]
    pub fn new(
        layout: Arc<Layout>,
        transactions: Arc<TransactionManager>,
        wal: Arc<crate::wal::WalWriter>,
        retention: usize,
    ) -> Self {
        Self {
            layout,
            transactions,
            wal,
            retention,
        }
    }

    /// Writes a new checkpoint file capturing every currently active
    /// transaction, then prunes old checkpoints and compacts every
    /// database's WAL down to entries newer than this checkpoint.
    pub fn checkpoint(&self) -> crate::error::CoreResult<()> {
        let now = Utc::now();
        let active_transactions = self
            .transactions
            .active_transactions()
            .into_iter()
            .map(|t| CheckpointedTransaction {
                id: t.id,
                isolation: t.isolation,
                start_time: t.start_time.into(),
                locks: t.locks.into_iter().collect(),
            })
            .collect();

        let checkpoint = Checkpoint {
            timestamp: now,
            active_transactions,
        };

        let file_name = format!("checkpoint_{}.json", now.format("%Y%m%d_%H%M%S"));
        let path = self.layout.checkpoints_dir().join(file_name);
        self.layout.write_json(&path, &checkpoint)?;

        self.prune_old_checkpoints()?;
        self.compact_logs(&checkpoint)?;
        Ok(())
    }

    /// Keeps only the `retention` newest checkpoint files (by filename,
    /// which sorts lexicographically in timestamp order).
    fn prune_old_checkpoints(&self) -> crate::error::CoreResult<()> {
        let dir = self.layout.checkpoints_dir();
        let entries = std::fs::read_dir(&dir).map_err(docdb_storage::StorageError::Io)?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("checkpoint_"))
            .collect();
        names.sort();
        if names.len() > self.retention {
            for stale in &names[..names.len() - self.retention] {
                let _ = std::fs::remove_file(dir.join(stale));
            }
        }
        Ok(())
    }

    /// Compacts every database's WAL to entries strictly newer than
    /// `checkpoint.timestamp`.
    fn compact_logs(&self, checkpoint: &Checkpoint) -> crate::error::CoreResult<()> {
        for db in self.layout.list_databases()? {
            let records = self.wal.read_all(&db)?;
            let kept: Vec<_> = records
                .into_iter()
                .filter(|r| r.timestamp > checkpoint.timestamp)
                .collect();
            self.wal.compact(&db, &kept)?;
        }
        Ok(())
    }

    /// Returns the most recent checkpoint, if any.
    ///
    /// A corrupted or empty checkpoint file is deleted and the next-newest
    /// file is tried, down to the oldest; this differs from the source's
    /// `_get_latest_checkpoint`, which only ever inspects the single newest
    /// file and gives up on the first parse failure (see DESIGN.md).
    pub fn latest(&self) -> crate::error::CoreResult<Option<Checkpoint>> {
        let dir = self.layout.checkpoints_dir();
        if !dir.is_dir() {
            return Ok(None);
        }
        let entries = std::fs::read_dir(&dir).map_err(docdb_storage::StorageError::Io)?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("checkpoint_"))
            .collect();
        names.sort();

        while let Some(candidate) = names.pop() {
            let path = dir.join(&candidate);
            match self.layout.read_json::<Checkpoint>(&path) {
                Ok(Some(checkpoint)) => return Ok(Some(checkpoint)),
                Ok(None) | Err(_) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(None)
    }

    /// Spawns a daemon-style background thread that checkpoints every
    /// `interval`, polling once a second the way the source's
    /// `_periodic_checkpoint` loop does. The thread keeps running until
    /// `stop` is set.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let mut last = std::time::Instant::now();
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(1));
                if last.elapsed() >= interval {
                    if let Err(err) = self.checkpoint() {
                        tracing::warn!(error = %err, "checkpoint failed");
                    }
                    last = std::time::Instant::now();
                }
            }
        })
    }
}
