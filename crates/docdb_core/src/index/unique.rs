//! Unique-constraint enforcement for a single `(collection, field)` pair.
//!
//! Grounded on `document_validator.py`'s `_check_unique_constraint`: the
//! index is a flat value -> owning-document-id map, persisted as one JSON
//! file per indexed field under `<db>/<collection>/indexes/<field>.idx`.
//! Checking and claiming a value happen in the same step, matching the
//! source's "look up, and if free, immediately record" behavior.

use crate::error::{CoreError, CoreResult};
use docdb_storage::Layout;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Renders a field value to the string key the unique index stores it
/// under. Numbers and strings are the only values a unique index is
/// meaningfully declared on, but any JSON value is accepted.
fn canonical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A single unique index file: `field value -> owning document id`.
pub struct UniqueIndex {
    layout: Arc<Layout>,
    db: String,
    collection: String,
    field: String,
}

impl UniqueIndex {
    /// Opens (without yet creating) the unique index for `collection.field`.
    #[must_use]
    pub fn new(layout: Arc<Layout>, db: impl Into<String>, collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            layout,
            db: db.into(),
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Creates an empty index file if one doesn't already exist.
    pub fn create(&self) -> CoreResult<()> {
        let path = self.layout.unique_index_path(&self.db, &self.collection, &self.field);
        if path.is_file() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(docdb_storage::StorageError::Io)?;
        }
        self.write(&HashMap::new())?;
        Ok(())
    }

    /// Deletes the index file, if present.
    pub fn drop(&self) -> CoreResult<()> {
        let path = self.layout.unique_index_path(&self.db, &self.collection, &self.field);
        if path.is_file() {
            std::fs::remove_file(path).map_err(docdb_storage::StorageError::Io)?;
        }
        Ok(())
    }

    fn read(&self) -> CoreResult<HashMap<String, String>> {
        let path = self.layout.unique_index_path(&self.db, &self.collection, &self.field);
        Ok(self.layout.read_json(&path)?.unwrap_or_default())
    }

    fn write(&self, index: &HashMap<String, String>) -> CoreResult<()> {
        let path = self.layout.unique_index_path(&self.db, &self.collection, &self.field);
        self.layout.write_json(&path, index)?;
        Ok(())
    }

    /// Checks that `value` is free (or already owned by `doc_id`), and if
    /// so claims it for `doc_id`. Returns an error naming the field when the
    /// value is already owned by a different document.
    pub fn check_and_claim(&self, value: &Value, doc_id: &str) -> CoreResult<()> {
        let mut index = self.read()?;
        let key = canonical_key(value);
        if let Some(owner) = index.get(&key) {
            if owner != doc_id {
                return Err(CoreError::validation_error(format!(
                    "Duplicate value for unique field '{}'",
                    self.field
                )));
            }
        }
        index.insert(key, doc_id.to_string());
        self.write(&index)
    }

    /// Releases `value` from the index (e.g. on delete, or before a claim
    /// for an update changes which value a document owns).
    pub fn release(&self, value: &Value) -> CoreResult<()> {
        let mut index = self.read()?;
        index.remove(&canonical_key(value));
        self.write(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn index() -> (TempDir, UniqueIndex) {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(Layout::new(dir.path()).unwrap());
        layout.create_database("shop").unwrap();
        let idx = UniqueIndex::new(layout, "shop", "users", "email");
        idx.create().unwrap();
        (dir, idx)
    }

    #[test]
    fn first_claim_succeeds() {
        let (_dir, idx) = index();
        idx.check_and_claim(&json!("ada@example.com"), "1").unwrap();
    }

    #[test]
    fn duplicate_value_from_another_document_is_rejected() {
        let (_dir, idx) = index();
        idx.check_and_claim(&json!("ada@example.com"), "1").unwrap();
        let err = idx.check_and_claim(&json!("ada@example.com"), "2").unwrap_err();
        assert!(err.to_string().contains("Duplicate value"));
    }

    #[test]
    fn reclaiming_by_the_same_document_is_a_no_op() {
        let (_dir, idx) = index();
        idx.check_and_claim(&json!("ada@example.com"), "1").unwrap();
        idx.check_and_claim(&json!("ada@example.com"), "1").unwrap();
    }

    #[test]
    fn release_then_claim_by_another_document_succeeds() {
        let (_dir, idx) = index();
        idx.check_and_claim(&json!("ada@example.com"), "1").unwrap();
        idx.release(&json!("ada@example.com")).unwrap();
        idx.check_and_claim(&json!("ada@example.com"), "2").unwrap();
    }
}
