//! On-disk directory layout for databases, collections, indexes, the WAL and
//! checkpoints.
//!
//! Backends in the original design were opaque byte stores; this crate's job
//! changed shape to match the spec's concrete, inspectable file tree instead:
//!
//! ```text
//! <root>/
//!   transaction_logs/<db>_transactions.log
//!   checkpoints/checkpoint_<YYYYMMDD_HHMMSS>.json
//!   <db>/
//!     <collection>.json
//!     indexes/<collection>_<field>_index.json
//!     <collection>/indexes/<field>.idx
//! ```

use crate::error::{StorageError, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name reserved for the per-database write-ahead logs.
pub const TRANSACTION_LOGS_DIR: &str = "transaction_logs";

/// Directory name reserved for checkpoint snapshots.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Names that may not be used for a database, since they collide with the
/// reserved system directories at the layout root.
pub const RESERVED_DIR_NAMES: [&str; 2] = [TRANSACTION_LOGS_DIR, CHECKPOINTS_DIR];

/// Owns the root directory and knows every path the rest of the crate needs.
///
/// `Layout` does not itself hold any lock or transaction state; it is a thin,
/// stateless path calculator plus small JSON read/write helpers, mirroring
/// `storage.py`'s `load_collection`/`save_collection` free functions but
/// gathered behind one type so collections, indexes, the WAL, and
/// checkpoints all agree on where things live.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Opens (creating if necessary) a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join(TRANSACTION_LOGS_DIR))?;
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;
        Ok(Self { root })
    }

    /// Returns the layout's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates a database or collection name.
    ///
    /// Names must be non-empty, start with a letter, and contain only
    /// letters, digits and underscores.
    pub fn validate_name(name: &str, kind: &str) -> StorageResult<()> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(StorageError::InvalidName(format!(
                "{kind} name cannot be empty"
            )));
        };
        if !first.is_alphabetic() {
            return Err(StorageError::InvalidName(format!(
                "{kind} name must start with a letter"
            )));
        }
        if !chars.all(|c| c.is_alphanumeric() || c == '_') {
            return Err(StorageError::InvalidName(format!(
                "{kind} name can only contain letters, numbers, and underscores"
            )));
        }
        Ok(())
    }

    /// Directory for one database.
    #[must_use]
    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.root.join(db)
    }

    /// Directory holding B+ tree index dumps for one database.
    #[must_use]
    pub fn indexes_dir(&self, db: &str) -> PathBuf {
        self.database_dir(db).join("indexes")
    }

    /// Path to the B+ tree dump for `<collection>.<field>`.
    #[must_use]
    pub fn btree_index_path(&self, db: &str, collection: &str, field: &str) -> PathBuf {
        self.indexes_dir(db)
            .join(format!("{collection}_{field}_index.json"))
    }

    /// Directory holding unique-constraint index files for one collection.
    #[must_use]
    pub fn unique_index_dir(&self, db: &str, collection: &str) -> PathBuf {
        self.database_dir(db).join(collection).join("indexes")
    }

    /// Path to the unique-constraint map for `<collection>.<field>`.
    #[must_use]
    pub fn unique_index_path(&self, db: &str, collection: &str, field: &str) -> PathBuf {
        self.unique_index_dir(db, collection)
            .join(format!("{field}.idx"))
    }

    /// Path to a collection's JSON array file.
    #[must_use]
    pub fn collection_path(&self, db: &str, collection: &str) -> PathBuf {
        self.database_dir(db).join(format!("{collection}.json"))
    }

    /// Path to a database's write-ahead log.
    #[must_use]
    pub fn wal_path(&self, db: &str) -> PathBuf {
        self.root
            .join(TRANSACTION_LOGS_DIR)
            .join(format!("{db}_transactions.log"))
    }

    /// Directory holding checkpoint snapshots.
    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINTS_DIR)
    }

    /// Directory holding every database's write-ahead log.
    #[must_use]
    pub fn transaction_logs_dir(&self) -> PathBuf {
        self.root.join(TRANSACTION_LOGS_DIR)
    }

    /// Lists database names, excluding the reserved system directories.
    pub fn list_databases(&self) -> StorageResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if RESERVED_DIR_NAMES.contains(&name.as_str()) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a database directory exists.
    #[must_use]
    pub fn database_exists(&self, db: &str) -> bool {
        self.database_dir(db).is_dir()
    }

    /// Creates a new database directory and its `indexes/` subdirectory.
    pub fn create_database(&self, db: &str) -> StorageResult<()> {
        if self.database_exists(db) {
            return Err(StorageError::AlreadyExists(db.to_string()));
        }
        fs::create_dir_all(self.indexes_dir(db))?;
        Ok(())
    }

    /// Deletes a database directory and everything under it.
    pub fn delete_database(&self, db: &str) -> StorageResult<()> {
        let path = self.database_dir(db);
        if !path.is_dir() {
            return Err(StorageError::NotFound(db.to_string()));
        }
        fs::remove_dir_all(path)?;
        Ok(())
    }

    /// Lists collection names in a database (files ending in `.json` at the
    /// database's top level).
    pub fn list_collections(&self, db: &str) -> StorageResult<Vec<String>> {
        let dir = self.database_dir(db);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = file_name.strip_suffix(".json") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a collection file exists.
    #[must_use]
    pub fn collection_exists(&self, db: &str, collection: &str) -> bool {
        self.collection_path(db, collection).is_file()
    }

    /// Creates an empty collection file (`[]`).
    pub fn create_collection_file(&self, db: &str, collection: &str) -> StorageResult<()> {
        let path = self.collection_path(db, collection);
        if path.exists() {
            return Err(StorageError::AlreadyExists(collection.to_string()));
        }
        self.write_json(&path, &Vec::<Value>::new())
    }

    /// Loads a collection's documents.
    pub fn load_collection(&self, db: &str, collection: &str) -> StorageResult<Vec<Value>> {
        let path = self.collection_path(db, collection);
        if !path.is_file() {
            return Err(StorageError::NotFound(collection.to_string()));
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Overwrites a collection's documents.
    pub fn save_collection(
        &self,
        db: &str,
        collection: &str,
        documents: &[Value],
    ) -> StorageResult<()> {
        let path = self.collection_path(db, collection);
        self.write_json(&path, documents)
    }

    /// Reads and parses a JSON file, returning `Ok(None)` if it does not
    /// exist.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StorageResult<Option<T>> {
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Serializes `value` as pretty JSON to `path`, creating parent
    /// directories as needed.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(value)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Appends one line to a file, creating it (and parent directories) if
    /// necessary.
    pub fn append_line(&self, path: &Path, line: &str) -> StorageResult<()> {
        use std::io::Write;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}
