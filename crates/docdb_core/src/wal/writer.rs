//! Append-only writer and compaction for one database's write-ahead log.

use super::record::WalRecord;
use crate::error::CoreResult;
use docdb_storage::Layout;
use std::fs;
use std::sync::Arc;

/// Appends [`WalRecord`]s to `<db>_transactions.log` and compacts it at
/// checkpoint time.
///
/// Grounded on `_cleanup_old_logs`'s approach: rewrite to a temporary file
/// and rename over the original, so a crash mid-compaction never leaves a
/// half-written log in place.
pub struct WalWriter {
    layout: Arc<Layout>,
}

impl WalWriter {
    /// Wraps a storage layout for WAL access.
    #[must_use]
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    /// Appends one record as a single JSON line.
    pub fn append(&self, db: &str, record: &WalRecord) -> CoreResult<()> {
        let line = record.to_line()?;
        let path = self.layout.wal_path(db);
        self.layout.append_line(&path, &line)?;
        Ok(())
    }

    /// Reads every record currently in `db`'s log, in file order (oldest
    /// first).
    pub fn read_all(&self, db: &str) -> CoreResult<Vec<WalRecord>> {
        let path = self.layout.wal_path(db);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(WalRecord::from_line(line)?);
        }
        Ok(records)
    }

    /// Rewrites `db`'s log to contain only `records`, atomically.
    ///
    /// Used at checkpoint time to drop entries for transactions already
    /// captured in the checkpoint snapshot.
    pub fn compact(&self, db: &str, records: &[WalRecord]) -> CoreResult<()> {
        let path = self.layout.wal_path(db);
        let tmp_path = path.with_extension("log.tmp");

        {
            use std::io::Write;
            if let Some(parent) = tmp_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&tmp_path)?;
            for record in records {
                writeln!(file, "{}", record.to_line()?)?;
            }
            file.flush()?;
        }

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
