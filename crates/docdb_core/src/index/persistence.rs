//! Disk persistence for B+ tree secondary indexes.
//!
//! Grounded on `indexing.py`'s `Index`/`IndexManager`: one JSON file per
//! `(collection, field)` under `<db>/indexes/<collection>_<field>_index.json`.
//! Unlike the source's `to_dict`, which serializes the index as a JSON
//! object keyed by the raw field value (silently stringifying numeric keys
//! under `json.dump`, so a numeric `10` and string `"10"` collide on
//! reload), the on-disk shape here is an explicit `(value, doc_ids)` entry
//! list that round-trips through [`BPlusTree::entries`]/[`BPlusTree::from_entries`]
//! without losing the value's original JSON type.

use crate::error::CoreResult;
use crate::index::BPlusTree;
use docdb_storage::Layout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Serialize, Deserialize)]
struct IndexFile {
    collection_name: String,
    field_name: String,
    entries: Vec<(Value, Vec<String>)>,
}

/// Owns every open B+ tree index for one database, keyed by
/// `(collection, field)`, and keeps each one's on-disk file in sync.
pub struct IndexManager {
    layout: Arc<Layout>,
    db: String,
    order: usize,
    trees: Mutex<HashMap<(String, String), BPlusTree>>,
}

impl IndexManager {
    /// Opens the index manager for one database at the configured B+ tree
    /// order. Existing index files are loaded lazily, on first access.
    #[must_use]
    pub fn new(layout: Arc<Layout>, db: impl Into<String>, order: usize) -> Self {
        Self {
            layout,
            db: db.into(),
            order,
            trees: Mutex::new(HashMap::new()),
        }
    }

    /// Declares a new index on `collection.field`, persisting an empty tree.
    /// Returns `false` if the index is already declared.
    pub fn create_index(&self, collection: &str, field: &str) -> CoreResult<bool> {
        let mut trees = self.trees.lock().unwrap();
        let key = (collection.to_string(), field.to_string());
        if trees.contains_key(&key) || self.layout.btree_index_path(&self.db, collection, field).is_file() {
            return Ok(false);
        }
        let tree = BPlusTree::new(self.order);
        self.save(collection, field, &tree)?;
        trees.insert(key, tree);
        Ok(true)
    }

    /// Removes an index's file and in-memory tree.
    pub fn drop_index(&self, collection: &str, field: &str) -> CoreResult<bool> {
        let mut trees = self.trees.lock().unwrap();
        let existed = trees.remove(&(collection.to_string(), field.to_string())).is_some();
        let path = self.layout.btree_index_path(&self.db, collection, field);
        if path.is_file() {
            std::fs::remove_file(path).map_err(docdb_storage::StorageError::Io)?;
            return Ok(true);
        }
        Ok(existed)
    }

    /// Lists every field `collection` has an index on.
    #[must_use]
    pub fn list_indexes(&self, collection: &str) -> Vec<String> {
        self.trees
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, field)| field.clone())
            .collect()
    }

    /// Returns whether `collection.field` currently has an index declared,
    /// loading it from disk first if it isn't already in memory.
    pub fn has_index(&self, collection: &str, field: &str) -> CoreResult<bool> {
        self.ensure_loaded(collection, field)?;
        Ok(self.trees.lock().unwrap().contains_key(&(collection.to_string(), field.to_string())))
    }

    /// Adds one `(value, doc_id)` entry to an index and persists it.
    pub fn add_entry(&self, collection: &str, field: &str, value: &Value, doc_id: &str) -> CoreResult<()> {
        self.ensure_loaded(collection, field)?;
        let mut trees = self.trees.lock().unwrap();
        if let Some(tree) = trees.get_mut(&(collection.to_string(), field.to_string())) {
            tree.insert(value.clone(), doc_id.to_string());
            let snapshot = tree.entries();
            drop(trees);
            self.write_entries(collection, field, snapshot)?;
        }
        Ok(())
    }

    /// Removes one `(value, doc_id)` entry from an index and persists it.
    pub fn remove_entry(&self, collection: &str, field: &str, value: &Value, doc_id: &str) -> CoreResult<()> {
        self.ensure_loaded(collection, field)?;
        let mut trees = self.trees.lock().unwrap();
        if let Some(tree) = trees.get_mut(&(collection.to_string(), field.to_string())) {
            tree.remove(value, doc_id);
            let snapshot = tree.entries();
            drop(trees);
            self.write_entries(collection, field, snapshot)?;
        }
        Ok(())
    }

    /// Finds every document id recorded under `value` in `collection.field`'s
    /// index. Returns an empty list if the index doesn't exist.
    pub fn find(&self, collection: &str, field: &str, value: &Value) -> CoreResult<Vec<String>> {
        self.ensure_loaded(collection, field)?;
        Ok(self
            .trees
            .lock()
            .unwrap()
            .get(&(collection.to_string(), field.to_string()))
            .map(|tree| tree.find(value))
            .unwrap_or_default())
    }

    fn ensure_loaded(&self, collection: &str, field: &str) -> CoreResult<()> {
        let key = (collection.to_string(), field.to_string());
        if self.trees.lock().unwrap().contains_key(&key) {
            return Ok(());
        }
        let path = self.layout.btree_index_path(&self.db, collection, field);
        if let Some(file) = self.layout.read_json::<IndexFile>(&path)? {
            let tree = BPlusTree::from_entries(self.order, file.entries);
            self.trees.lock().unwrap().insert(key, tree);
        }
        Ok(())
    }

    fn save(&self, collection: &str, field: &str, tree: &BPlusTree) -> CoreResult<()> {
        self.write_entries(collection, field, tree.entries())
    }

    fn write_entries(&self, collection: &str, field: &str, entries: Vec<(Value, Vec<String>)>) -> CoreResult<()> {
        let path = self.layout.btree_index_path(&self.db, collection, field);
        let file = IndexFile {
            collection_name: collection.to_string(),
            field_name: field.to_string(),
            entries,
        };
        self.layout.write_json(&path, &file)?;
        Ok(())
    }
}
