//! The query executor: binds parsed operations to transactions, locks, the
//! WAL, document validation, and index maintenance.
//!
//! Grounded on `app.py`'s `DocumentDB`: each operation begins a transaction
//! at the isolation level §4.6 names, does its work, and commits or aborts
//! as one unit. Unlike the source — which writes each batch statement's
//! effects to its collection file immediately, relying on crash recovery to
//! undo a later statement's failure — every operation here stages its
//! collection mutations in memory and only reaches disk once every
//! statement has fully succeeded, so a failed operation (or batch) never
//! leaves a partial mutation visible to a subsequent read (see DESIGN.md).

use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexManager, UniqueIndex};
use crate::lock::LockMode;
use crate::query::{self, matches_equality, Operation};
use crate::recovery::RecoveryManager;
use crate::transaction::{IsolationLevel, TransactionManager};
use crate::types::TransactionId;
use crate::validator::DocumentValidator;
use crate::wal::WalWriter;
use docdb_storage::Layout;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// The outcome of one executed [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecResult {
    /// `find`: every matching document.
    Found(Vec<Value>),
    /// `insert`: the stored document, with `_id` assigned if it was absent.
    Inserted(Value),
    /// `insert_many`: the number of documents inserted.
    InsertedMany(usize),
    /// `update`: the number of documents updated.
    Updated(usize),
    /// `delete`: the number of documents removed.
    Deleted(usize),
    /// A schema operation's human-readable acknowledgement.
    Ack(String),
}

fn doc_id_of(document: &Value) -> CoreResult<String> {
    document
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::validation_error("document is missing a string '_id'"))
}

enum IndexOp {
    Add { collection: String, field: String, value: Value, doc_id: String },
    Remove { collection: String, field: String, value: Value, doc_id: String },
}

/// An open database: the facade callers actually use.
///
/// Owns the storage layout, the transaction/lock/WAL stack, and a
/// background checkpoint thread that runs for as long as the `Database` is
/// alive.
pub struct Database {
    layout: Arc<Layout>,
    config: Config,
    transactions: Arc<TransactionManager>,
    checkpoints: Arc<CheckpointManager>,
    stop: Arc<AtomicBool>,
    checkpoint_thread: Mutex<Option<JoinHandle<()>>>,
    indexes: Mutex<HashMap<String, Arc<IndexManager>>>,
}

impl Database {
    /// Opens a database rooted at `root`, recovering from any crash and
    /// starting the periodic checkpoint thread.
    pub fn open(root: impl Into<PathBuf>, config: Config) -> CoreResult<Self> {
        let layout = Arc::new(Layout::new(root)?);
        let wal = Arc::new(WalWriter::new(layout.clone()));
        let transactions = Arc::new(TransactionManager::new(&config, wal.clone()));
        let checkpoints = Arc::new(CheckpointManager::new(
            layout.clone(),
            transactions.clone(),
            wal.clone(),
            config.checkpoint_retention,
        ));

        let recovery = RecoveryManager::new(layout.clone(), wal, checkpoints.clone());
        let report = recovery.recover()?;
        tracing::info!(
            undone = report.undone.len(),
            redone = report.redone.len(),
            "recovery complete"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let handle = checkpoints.clone().spawn_periodic(config.checkpoint_interval, stop.clone());

        Ok(Self {
            layout,
            config,
            transactions,
            checkpoints,
            stop,
            checkpoint_thread: Mutex::new(Some(handle)),
            indexes: Mutex::new(HashMap::new()),
        })
    }

    /// Forces an immediate checkpoint, outside the periodic schedule.
    pub fn checkpoint_now(&self) -> CoreResult<()> {
        self.checkpoints.checkpoint()
    }

    /// Stops the background checkpoint thread and waits for it to exit.
    pub fn close(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.checkpoint_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// The full set of fields `collection` enforces uniqueness on: `_id`
    /// plus every field that has had `create_index` declared on it. A single
    /// `createIndex({field: 1})` call establishes both a B+ tree and a
    /// uniqueness guarantee at once — there is no separate "unique index"
    /// declaration — so this is always computed from `IndexManager`'s
    /// declared fields rather than tracked separately.
    fn unique_fields(&self, db: &str, collection: &str) -> CoreResult<Vec<String>> {
        let mut fields = vec!["_id".to_string()];
        fields.extend(self.index_manager(db)?.list_indexes(collection));
        Ok(fields)
    }

    fn index_manager(&self, db: &str) -> CoreResult<Arc<IndexManager>> {
        let mut cache = self.indexes.lock();
        if let Some(manager) = cache.get(db) {
            return Ok(manager.clone());
        }
        if !self.layout.database_exists(db) {
            return Err(CoreError::not_found(format!("Database '{db}' does not exist")));
        }
        let manager = Arc::new(IndexManager::new(self.layout.clone(), db, self.config.btree_order));
        cache.insert(db.to_string(), manager.clone());
        Ok(manager)
    }

    fn finish<T>(&self, txn: TransactionId, result: CoreResult<T>) -> CoreResult<T> {
        match result {
            Ok(value) => {
                self.transactions.commit(txn)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.transactions.abort(txn);
                Err(err)
            }
        }
    }

    fn update_indexes(&self, db: &str, collection: &str, document: &Value) -> CoreResult<()> {
        let manager = self.index_manager(db)?;
        let doc_id = doc_id_of(document)?;
        for field in manager.list_indexes(collection) {
            if let Some(value) = document.get(&field) {
                manager.add_entry(collection, &field, value, &doc_id)?;
            }
        }
        Ok(())
    }

    fn reindex_changed_fields(&self, db: &str, collection: &str, old: &Value, new: &Value) -> CoreResult<()> {
        let manager = self.index_manager(db)?;
        let doc_id = doc_id_of(new)?;
        for field in manager.list_indexes(collection) {
            let old_value = old.get(&field);
            let new_value = new.get(&field);
            if old_value == new_value {
                continue;
            }
            if let Some(v) = old_value {
                manager.remove_entry(collection, &field, v, &doc_id)?;
            }
            if let Some(v) = new_value {
                manager.add_entry(collection, &field, v, &doc_id)?;
            }
        }
        Ok(())
    }

    fn release_indexes(&self, db: &str, collection: &str, document: &Value) -> CoreResult<()> {
        let doc_id = doc_id_of(document)?;
        let fields = self.unique_fields(db, collection)?;
        DocumentValidator::new(self.layout.clone(), db).release(collection, document, &fields)?;
        let manager = self.index_manager(db)?;
        for field in manager.list_indexes(collection) {
            if let Some(value) = document.get(&field) {
                manager.remove_entry(collection, &field, value, &doc_id)?;
            }
        }
        Ok(())
    }

    /// Releases `new`'s claimed value and re-claims `old`'s for every field
    /// that changed, undoing a partially-applied update when a later
    /// statement in the same call (or batch) fails.
    fn restore_unique_values(&self, db: &str, collection: &str, fields: &[String], old: &Value, new: &Value) {
        let Ok(doc_id) = doc_id_of(old) else { return };
        for field in fields {
            let old_value = old.get(field);
            let new_value = new.get(field);
            if old_value == new_value {
                continue;
            }
            if let Some(v) = new_value {
                let _ = UniqueIndex::new(self.layout.clone(), db, collection, field).release(v);
            }
            if let Some(v) = old_value {
                let _ = UniqueIndex::new(self.layout.clone(), db, collection, field).check_and_claim(v, &doc_id);
            }
        }
    }

    // -- Database/collection/index schema operations --------------------

    /// Creates a new, empty database directory.
    pub fn create_database(&self, db: &str) -> CoreResult<()> {
        Layout::validate_name(db, "Database")?;
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let result = (|| {
            self.layout.create_database(db)?;
            self.transactions.log_operation(txn, "create_database", db, None, None, None, Some(json!({"name": db})))?;
            Ok(())
        })();
        self.finish(txn, result)
    }

    /// Deletes a database and everything under it.
    pub fn delete_database(&self, db: &str) -> CoreResult<()> {
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let result = (|| {
            self.transactions.log_operation(txn, "delete_database", db, None, None, Some(json!({"name": db})), None)?;
            self.layout.delete_database(db)?;
            self.indexes.lock().remove(db);
            Ok(())
        })();
        self.finish(txn, result)
    }

    /// Lists every database, excluding reserved system directories.
    pub fn list_databases(&self) -> CoreResult<Vec<String>> {
        Ok(self.layout.list_databases()?)
    }

    /// Lists every collection in `db`.
    pub fn list_collections(&self, db: &str) -> CoreResult<Vec<String>> {
        Ok(self.layout.list_collections(db)?)
    }

    /// Creates an empty collection and registers its `_id` unique index.
    pub fn create_collection(&self, db: &str, collection: &str) -> CoreResult<()> {
        Layout::validate_name(collection, "Collection")?;
        if !self.layout.database_exists(db) {
            return Err(CoreError::not_found(format!("Database '{db}' does not exist")));
        }
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let result = (|| {
            self.layout.create_collection_file(db, collection)?;
            UniqueIndex::new(self.layout.clone(), db, collection, "_id").create()?;
            self.transactions.log_operation(
                txn,
                "create_collection",
                db,
                Some(collection.to_string()),
                None,
                None,
                Some(json!({"name": collection})),
            )?;
            Ok(())
        })();
        self.finish(txn, result)
    }

    /// Declares a secondary index on `collection.field`, backfilling it from
    /// every document already present. This establishes both a B+ tree (for
    /// equality lookups) and a uniqueness guarantee on `field` in the same
    /// call — there's no separate operation for declaring a unique index —
    /// so backfilling fails, and the index is not created, if two existing
    /// documents already share a value for `field`.
    pub fn create_index(&self, db: &str, collection: &str, field: &str) -> CoreResult<()> {
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let mut claimed: Vec<Value> = Vec::new();
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let manager = self.index_manager(db)?;
            if !manager.create_index(collection, field)? {
                return Err(CoreError::already_exists(format!("Index already exists on {collection}.{field}")));
            }
            let unique = UniqueIndex::new(self.layout.clone(), db, collection, field);
            unique.create()?;

            for document in self.layout.load_collection(db, collection)? {
                if let Some(value) = document.get(field) {
                    let doc_id = doc_id_of(&document)?;
                    unique.check_and_claim(value, &doc_id)?;
                    claimed.push(value.clone());
                    manager.add_entry(collection, field, value, &doc_id)?;
                }
            }
            self.transactions.log_operation(
                txn,
                "create_index",
                db,
                Some(collection.to_string()),
                None,
                None,
                Some(json!({"field": field})),
            )?;
            Ok(())
        })();

        if result.is_err() {
            let unique = UniqueIndex::new(self.layout.clone(), db, collection, field);
            for value in &claimed {
                let _ = unique.release(value);
            }
            let _ = unique.drop();
            if let Ok(manager) = self.index_manager(db) {
                let _ = manager.drop_index(collection, field);
            }
        }
        self.finish(txn, result)
    }

    /// Drops a secondary index, removing both its B+ tree and the
    /// uniqueness guarantee `create_index` established alongside it.
    pub fn drop_index(&self, db: &str, collection: &str, field: &str) -> CoreResult<()> {
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let result = (|| {
            let manager = self.index_manager(db)?;
            if !manager.drop_index(collection, field)? {
                return Err(CoreError::not_found(format!("Index does not exist on {collection}.{field}")));
            }
            UniqueIndex::new(self.layout.clone(), db, collection, field).drop()?;
            self.transactions.log_operation(
                txn,
                "drop_index",
                db,
                Some(collection.to_string()),
                Some(json!({"field": field}).to_string()),
                Some(json!({"field": field})),
                None,
            )?;
            Ok(())
        })();
        self.finish(txn, result)
    }

    // -- Document operations ---------------------------------------------

    fn find(&self, db: &str, collection: &str, selector: &Value) -> CoreResult<Vec<Value>> {
        let txn = self.transactions.begin(IsolationLevel::RepeatableRead);
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let mut matched = Vec::new();
            for document in self.layout.load_collection(db, collection)? {
                if !matches_equality(&document, selector) {
                    continue;
                }
                let doc_id = doc_id_of(&document)?;
                self.transactions.acquire_lock(txn, db, collection, &doc_id, LockMode::Read)?;
                matched.push(document);
            }
            Ok(matched)
        })();
        self.finish(txn, result)
    }

    fn insert(&self, db: &str, collection: &str, mut document: Value) -> CoreResult<Value> {
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let mut claimed = false;
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let validator = DocumentValidator::new(self.layout.clone(), db);
            validator.ensure_id(&mut document);
            let fields = self.unique_fields(db, collection)?;
            validator.validate(collection, &document, &fields, None)?;
            claimed = true;

            let doc_id = doc_id_of(&document)?;
            self.transactions.acquire_lock(txn, db, collection, &doc_id, LockMode::Write)?;
            self.transactions.log_operation(
                txn,
                "insert",
                db,
                Some(collection.to_string()),
                Some(doc_id),
                None,
                Some(document.clone()),
            )?;

            let mut documents = self.layout.load_collection(db, collection)?;
            documents.push(document.clone());
            self.layout.save_collection(db, collection, &documents)?;
            self.update_indexes(db, collection, &document)?;
            Ok(document.clone())
        })();

        if result.is_err() && claimed {
            if let Ok(fields) = self.unique_fields(db, collection) {
                let _ = DocumentValidator::new(self.layout.clone(), db).release(collection, &document, &fields);
            }
        }
        self.finish(txn, result)
    }

    fn insert_many(&self, db: &str, collection: &str, documents: Vec<Value>) -> CoreResult<usize> {
        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let mut claimed: Vec<Value> = Vec::new();
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let validator = DocumentValidator::new(self.layout.clone(), db);
            let fields = self.unique_fields(db, collection)?;
            let mut existing = self.layout.load_collection(db, collection)?;
            let mut staged = Vec::with_capacity(documents.len());

            for mut document in documents {
                validator.ensure_id(&mut document);
                validator.validate(collection, &document, &fields, None)?;
                claimed.push(document.clone());

                let doc_id = doc_id_of(&document)?;
                self.transactions.acquire_lock(txn, db, collection, &doc_id, LockMode::Write)?;
                self.transactions.log_operation(
                    txn,
                    "insert",
                    db,
                    Some(collection.to_string()),
                    Some(doc_id),
                    None,
                    Some(document.clone()),
                )?;
                staged.push(document);
            }

            existing.extend(staged.iter().cloned());
            self.layout.save_collection(db, collection, &existing)?;
            for document in &staged {
                self.update_indexes(db, collection, document)?;
            }
            Ok(staged.len())
        })();

        if result.is_err() {
            if let Ok(fields) = self.unique_fields(db, collection) {
                let validator = DocumentValidator::new(self.layout.clone(), db);
                for document in &claimed {
                    let _ = validator.release(collection, document, &fields);
                }
            }
        }
        self.finish(txn, result)
    }

    fn update(&self, db: &str, collection: &str, query: &Value, update: &Value) -> CoreResult<usize> {
        let txn = self.transactions.begin(IsolationLevel::RepeatableRead);
        let mut committed: Vec<(Value, Value)> = Vec::new();
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let validator = DocumentValidator::new(self.layout.clone(), db);
            let fields = self.unique_fields(db, collection)?;
            let mut documents = self.layout.load_collection(db, collection)?;
            let set_fields = update.get("$set").and_then(Value::as_object);

            let mut changes: Vec<(usize, Value, Value)> = Vec::new();
            for (i, document) in documents.iter().enumerate() {
                if !matches_equality(document, query) {
                    continue;
                }
                let mut new_document = document.clone();
                if let (Some(set_fields), Value::Object(map)) = (set_fields, &mut new_document) {
                    for (k, v) in set_fields {
                        map.insert(k.clone(), v.clone());
                    }
                }
                validator.validate(collection, &new_document, &fields, Some(document))?;
                validator.release_changed(collection, document, &new_document, &fields)?;
                committed.push((document.clone(), new_document.clone()));

                let doc_id = doc_id_of(&new_document)?;
                self.transactions.acquire_lock(txn, db, collection, &doc_id, LockMode::Write)?;
                self.transactions.log_operation(
                    txn,
                    "update",
                    db,
                    Some(collection.to_string()),
                    Some(doc_id),
                    Some(document.clone()),
                    Some(new_document.clone()),
                )?;
                changes.push((i, document.clone(), new_document));
            }

            for (i, _, new_document) in &changes {
                documents[*i] = new_document.clone();
            }
            if !changes.is_empty() {
                self.layout.save_collection(db, collection, &documents)?;
                for (_, old, new) in &changes {
                    self.reindex_changed_fields(db, collection, old, new)?;
                }
            }
            Ok(changes.len())
        })();

        if result.is_err() {
            if let Ok(fields) = self.unique_fields(db, collection) {
                for (old, new) in committed.iter().rev() {
                    self.restore_unique_values(db, collection, &fields, old, new);
                }
            }
        }
        self.finish(txn, result)
    }

    fn delete(&self, db: &str, collection: &str, selector: &Value) -> CoreResult<usize> {
        let txn = self.transactions.begin(IsolationLevel::RepeatableRead);
        let result = (|| {
            if !self.layout.collection_exists(db, collection) {
                return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
            }
            let documents = self.layout.load_collection(db, collection)?;
            let mut to_delete = Vec::new();
            for document in &documents {
                if !matches_equality(document, selector) {
                    continue;
                }
                let doc_id = doc_id_of(document)?;
                self.transactions.acquire_lock(txn, db, collection, &doc_id, LockMode::Write)?;
                self.transactions.log_operation(
                    txn,
                    "delete",
                    db,
                    Some(collection.to_string()),
                    Some(doc_id),
                    Some(document.clone()),
                    None,
                )?;
                to_delete.push(document.clone());
            }

            if !to_delete.is_empty() {
                let remaining: Vec<Value> = documents.into_iter().filter(|d| !to_delete.contains(d)).collect();
                self.layout.save_collection(db, collection, &remaining)?;
                for document in &to_delete {
                    self.release_indexes(db, collection, document)?;
                }
            }
            Ok(to_delete.len())
        })();
        self.finish(txn, result)
    }

    /// Executes one structured operation.
    pub fn execute(&self, db: &str, operation: Operation) -> CoreResult<ExecResult> {
        match operation {
            Operation::Find { collection, selector } => self.find(db, &collection, &selector).map(ExecResult::Found),
            Operation::Insert { collection, document } => self.insert(db, &collection, document).map(ExecResult::Inserted),
            Operation::InsertMany { collection, documents } => {
                self.insert_many(db, &collection, documents).map(ExecResult::InsertedMany)
            }
            Operation::Update { collection, query, update } => {
                self.update(db, &collection, &query, &update).map(ExecResult::Updated)
            }
            Operation::Delete { collection, selector } => self.delete(db, &collection, &selector).map(ExecResult::Deleted),
            Operation::CreateCollection { collection } => self
                .create_collection(db, &collection)
                .map(|()| ExecResult::Ack(format!("Collection '{collection}' created"))),
            Operation::CreateIndex { collection, field } => self
                .create_index(db, &collection, &field)
                .map(|()| ExecResult::Ack(format!("Index created on {collection}.{field}"))),
            Operation::DropIndex { collection, field } => self
                .drop_index(db, &collection, &field)
                .map(|()| ExecResult::Ack(format!("Index dropped from {collection}.{field}"))),
        }
    }

    /// Parses and executes one `db.collection.op(...)` query string.
    pub fn execute_query(&self, db: &str, query_str: &str) -> CoreResult<ExecResult> {
        let operation = query::parse(query_str)?;
        self.execute(db, operation)
    }

    /// Executes a `;`-separated batch of query strings under one
    /// SERIALIZABLE transaction: at most `config.max_batch_size` statements,
    /// a `config.batch_timeout` wall-clock budget, and abort-the-whole-batch
    /// on the first failure.
    pub fn execute_batch(&self, db: &str, batch_str: &str) -> CoreResult<String> {
        let statements = query::split_statements(batch_str);
        if statements.is_empty() {
            return Err(CoreError::parse_error("Invalid query format"));
        }
        if statements.len() > self.config.max_batch_size {
            return Err(CoreError::BatchError(format!(
                "Batch size exceeds maximum limit of {}",
                self.config.max_batch_size
            )));
        }

        let txn = self.transactions.begin(IsolationLevel::Serializable);
        let start = Instant::now();
        let mut staged: HashMap<String, Vec<Value>> = HashMap::new();
        let mut touched: HashSet<String> = HashSet::new();
        let mut claimed: Vec<(String, String, Value)> = Vec::new();
        let mut released: Vec<(String, String, Value, String)> = Vec::new();
        let mut index_ops: Vec<IndexOp> = Vec::new();

        let result = (|| {
            for (idx, statement) in statements.iter().enumerate() {
                if start.elapsed() > self.config.batch_timeout {
                    return Err(CoreError::BatchError(format!("Batch execution timeout at query {}", idx + 1)));
                }
                let outcome = query::parse(statement).map_err(|err| CoreError::batch_error(idx + 1, err.message())).and_then(
                    |operation| {
                        self.apply_batch_statement(
                            db,
                            txn,
                            operation,
                            &mut staged,
                            &mut touched,
                            &mut claimed,
                            &mut released,
                            &mut index_ops,
                        )
                    },
                );
                outcome.map_err(|err| CoreError::batch_error(idx + 1, err.message()))?;
            }

            for collection in &touched {
                if let Some(documents) = staged.get(collection) {
                    self.layout.save_collection(db, collection, documents)?;
                }
            }
            let manager = self.index_manager(db)?;
            for op in &index_ops {
                match op {
                    IndexOp::Add { collection, field, value, doc_id } => {
                        manager.add_entry(collection, field, value, doc_id)?;
                    }
                    IndexOp::Remove { collection, field, value, doc_id } => {
                        manager.remove_entry(collection, field, value, doc_id)?;
                    }
                }
            }
            Ok(format!("All {} queries executed successfully!", statements.len()))
        })();

        if result.is_err() {
            for (collection, field, value) in claimed.iter().rev() {
                let _ = UniqueIndex::new(self.layout.clone(), db, collection, field).release(value);
            }
            for (collection, field, value, doc_id) in released.iter().rev() {
                let _ = UniqueIndex::new(self.layout.clone(), db, collection, field).check_and_claim(value, doc_id);
            }
        }
        self.finish(txn, result)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_batch_statement(
        &self,
        db: &str,
        txn: TransactionId,
        operation: Operation,
        staged: &mut HashMap<String, Vec<Value>>,
        touched: &mut HashSet<String>,
        claimed: &mut Vec<(String, String, Value)>,
        released: &mut Vec<(String, String, Value, String)>,
        index_ops: &mut Vec<IndexOp>,
    ) -> CoreResult<()> {
        match operation {
            Operation::CreateCollection { collection } => self.create_collection(db, &collection),
            Operation::CreateIndex { collection, field } => self.create_index(db, &collection, &field),
            Operation::DropIndex { collection, field } => self.drop_index(db, &collection, &field),

            Operation::Find { collection, selector } => {
                self.ensure_staged(db, &collection, staged)?;
                let documents = staged.get(&collection).cloned().unwrap_or_default();
                for document in &documents {
                    if !matches_equality(document, &selector) {
                        continue;
                    }
                    let doc_id = doc_id_of(document)?;
                    self.transactions.acquire_lock(txn, db, &collection, &doc_id, LockMode::Read)?;
                }
                Ok(())
            }

            Operation::Insert { collection, mut document } => {
                self.ensure_staged(db, &collection, staged)?;
                let validator = DocumentValidator::new(self.layout.clone(), db);
                validator.ensure_id(&mut document);
                let fields = self.unique_fields(db, &collection)?;
                validator.validate(&collection, &document, &fields, None)?;
                for field in &fields {
                    if let Some(value) = document.get(field) {
                        claimed.push((collection.clone(), field.clone(), value.clone()));
                    }
                }

                let doc_id = doc_id_of(&document)?;
                self.transactions.acquire_lock(txn, db, &collection, &doc_id, LockMode::Write)?;
                self.transactions.log_operation(
                    txn,
                    "insert",
                    db,
                    Some(collection.clone()),
                    Some(doc_id),
                    None,
                    Some(document.clone()),
                )?;
                self.queue_index_adds(db, &collection, &document, index_ops)?;
                staged.entry(collection.clone()).or_default().push(document);
                touched.insert(collection);
                Ok(())
            }

            Operation::InsertMany { collection, documents } => {
                self.ensure_staged(db, &collection, staged)?;
                let validator = DocumentValidator::new(self.layout.clone(), db);
                let fields = self.unique_fields(db, &collection)?;
                for mut document in documents {
                    validator.ensure_id(&mut document);
                    validator.validate(&collection, &document, &fields, None)?;
                    for field in &fields {
                        if let Some(value) = document.get(field) {
                            claimed.push((collection.clone(), field.clone(), value.clone()));
                        }
                    }

                    let doc_id = doc_id_of(&document)?;
                    self.transactions.acquire_lock(txn, db, &collection, &doc_id, LockMode::Write)?;
                    self.transactions.log_operation(
                        txn,
                        "insert",
                        db,
                        Some(collection.clone()),
                        Some(doc_id),
                        None,
                        Some(document.clone()),
                    )?;
                    self.queue_index_adds(db, &collection, &document, index_ops)?;
                    staged.entry(collection.clone()).or_default().push(document);
                }
                touched.insert(collection);
                Ok(())
            }

            Operation::Update { collection, query, update } => {
                self.ensure_staged(db, &collection, staged)?;
                let validator = DocumentValidator::new(self.layout.clone(), db);
                let fields = self.unique_fields(db, &collection)?;
                let set_fields = update.get("$set").and_then(Value::as_object).cloned();
                let documents = staged.entry(collection.clone()).or_default();

                let mut changes: Vec<(usize, Value, Value)> = Vec::new();
                for (i, document) in documents.iter().enumerate() {
                    if !matches_equality(document, &query) {
                        continue;
                    }
                    let mut new_document = document.clone();
                    if let (Some(set_fields), Value::Object(map)) = (&set_fields, &mut new_document) {
                        for (k, v) in set_fields {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    validator.validate(&collection, &new_document, &fields, Some(document))?;
                    validator.release_changed(&collection, document, &new_document, &fields)?;
                    for field in &fields {
                        let old_value = document.get(field);
                        let new_value = new_document.get(field);
                        if old_value == new_value {
                            continue;
                        }
                        if let Some(value) = new_value {
                            claimed.push((collection.clone(), field.clone(), value.clone()));
                        }
                        if let Some(value) = old_value {
                            released.push((collection.clone(), field.clone(), value.clone(), doc_id_of(document)?));
                        }
                    }

                    let doc_id = doc_id_of(&new_document)?;
                    self.transactions.acquire_lock(txn, db, &collection, &doc_id, LockMode::Write)?;
                    self.transactions.log_operation(
                        txn,
                        "update",
                        db,
                        Some(collection.clone()),
                        Some(doc_id),
                        Some(document.clone()),
                        Some(new_document.clone()),
                    )?;
                    changes.push((i, document.clone(), new_document));
                }

                for (i, old, new) in &changes {
                    self.queue_index_changes(db, &collection, old, new, index_ops)?;
                    documents[*i] = new.clone();
                }
                if !changes.is_empty() {
                    touched.insert(collection);
                }
                Ok(())
            }

            Operation::Delete { collection, selector } => {
                self.ensure_staged(db, &collection, staged)?;
                let fields = self.unique_fields(db, &collection)?;
                let doc_list = staged.entry(collection.clone()).or_default();
                let drained: Vec<Value> = std::mem::take(doc_list);
                let mut keep = Vec::with_capacity(drained.len());
                let mut removed_any = false;

                for document in drained {
                    if matches_equality(&document, &selector) {
                        let doc_id = doc_id_of(&document)?;
                        self.transactions.acquire_lock(txn, db, &collection, &doc_id, LockMode::Write)?;
                        self.transactions.log_operation(
                            txn,
                            "delete",
                            db,
                            Some(collection.clone()),
                            Some(doc_id.clone()),
                            Some(document.clone()),
                            None,
                        )?;
                        for field in &fields {
                            if let Some(value) = document.get(field) {
                                UniqueIndex::new(self.layout.clone(), db, &collection, field).release(value)?;
                                released.push((collection.clone(), field.clone(), value.clone(), doc_id.clone()));
                            }
                        }
                        self.queue_index_removals(db, &collection, &document, index_ops)?;
                        removed_any = true;
                    } else {
                        keep.push(document);
                    }
                }
                *staged.entry(collection.clone()).or_default() = keep;
                if removed_any {
                    touched.insert(collection);
                }
                Ok(())
            }
        }
    }

    fn ensure_staged(&self, db: &str, collection: &str, staged: &mut HashMap<String, Vec<Value>>) -> CoreResult<()> {
        if staged.contains_key(collection) {
            return Ok(());
        }
        if !self.layout.collection_exists(db, collection) {
            return Err(CoreError::not_found(format!("Collection '{collection}' does not exist")));
        }
        let documents = self.layout.load_collection(db, collection)?;
        staged.insert(collection.to_string(), documents);
        Ok(())
    }

    fn queue_index_adds(&self, db: &str, collection: &str, document: &Value, index_ops: &mut Vec<IndexOp>) -> CoreResult<()> {
        let manager = self.index_manager(db)?;
        let doc_id = doc_id_of(document)?;
        for field in manager.list_indexes(collection) {
            if let Some(value) = document.get(&field) {
                index_ops.push(IndexOp::Add {
                    collection: collection.to_string(),
                    field,
                    value: value.clone(),
                    doc_id: doc_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn queue_index_changes(
        &self,
        db: &str,
        collection: &str,
        old: &Value,
        new: &Value,
        index_ops: &mut Vec<IndexOp>,
    ) -> CoreResult<()> {
        let manager = self.index_manager(db)?;
        let doc_id = doc_id_of(new)?;
        for field in manager.list_indexes(collection) {
            let old_value = old.get(&field);
            let new_value = new.get(&field);
            if old_value == new_value {
                continue;
            }
            if let Some(v) = old_value {
                index_ops.push(IndexOp::Remove {
                    collection: collection.to_string(),
                    field: field.clone(),
                    value: v.clone(),
                    doc_id: doc_id.clone(),
                });
            }
            if let Some(v) = new_value {
                index_ops.push(IndexOp::Add {
                    collection: collection.to_string(),
                    field,
                    value: v.clone(),
                    doc_id: doc_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn queue_index_removals(
        &self,
        db: &str,
        collection: &str,
        document: &Value,
        index_ops: &mut Vec<IndexOp>,
    ) -> CoreResult<()> {
        let manager = self.index_manager(db)?;
        let doc_id = doc_id_of(document)?;
        for field in manager.list_indexes(collection) {
            if let Some(value) = document.get(&field) {
                index_ops.push(IndexOp::Remove {
                    collection: collection.to_string(),
                    field,
                    value: value.clone(),
                    doc_id: doc_id.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn database() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), Config::default()).unwrap();
        db.create_database("shop").unwrap();
        db.create_collection("shop", "users").unwrap();
        (dir, db)
    }

    #[test]
    fn insert_then_find_round_trips_with_an_assigned_id() {
        let (_dir, db) = database();
        let ExecResult::Inserted(inserted) =
            db.execute_query("shop", "db.users.insert({name: 'Ada', age: 30})").unwrap()
        else {
            panic!("expected Inserted");
        };
        assert!(inserted.get("_id").and_then(Value::as_str).is_some());

        let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({name: 'Ada'})").unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected_and_collection_keeps_one_document() {
        let (_dir, db) = database();
        db.execute_query("shop", "db.users.insert({_id: 'x', name: 'A'})").unwrap();
        let err = db.execute_query("shop", "db.users.insert({_id: 'x', name: 'B'})").unwrap_err();
        assert_eq!(err.message(), "Duplicate value for unique field '_id'");

        let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({})").unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn batch_aborts_whole_batch_on_duplicate_id() {
        let (_dir, db) = database();
        let err = db
            .execute_batch("shop", "db.users.insert({_id: '1'}); db.users.insert({_id: '1'})")
            .unwrap_err();
        assert_eq!(err.message(), "Query 2 failed: Duplicate value for unique field '_id'");

        let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({})").unwrap() else {
            panic!("expected Found");
        };
        assert!(found.is_empty());

        // the rolled-back _id claim must be reusable afterwards
        db.execute_query("shop", "db.users.insert({_id: '1'})").unwrap();
    }

    #[test]
    fn unique_index_backed_find_returns_exactly_one_match() {
        let (_dir, db) = database();
        db.create_index("shop", "users", "email").unwrap();
        db.execute_query("shop", "db.users.insert({_id: 'a', email: 'x@y'})").unwrap();
        let err = db.execute_query("shop", "db.users.insert({_id: 'b', email: 'x@y'})").unwrap_err();
        assert_eq!(err.message(), "Duplicate value for unique field 'email'");

        let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({email: 'x@y'})").unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn update_sets_fields_and_reports_count() {
        let (_dir, db) = database();
        db.execute_query("shop", "db.users.insert({_id: '1', name: 'A', age: 20})").unwrap();
        let ExecResult::Updated(count) =
            db.execute_query("shop", "db.users.update({name: 'A'}, {$set: {age: 21}})").unwrap()
        else {
            panic!("expected Updated");
        };
        assert_eq!(count, 1);

        let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({name: 'A'})").unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(found[0]["age"], json!(21));
    }

    #[test]
    fn delete_removes_matching_documents_and_releases_the_id() {
        let (_dir, db) = database();
        db.execute_query("shop", "db.users.insert({_id: '1', name: 'A'})").unwrap();
        let ExecResult::Deleted(count) = db.execute_query("shop", "db.users.delete({name: 'A'})").unwrap() else {
            panic!("expected Deleted");
        };
        assert_eq!(count, 1);

        db.execute_query("shop", "db.users.insert({_id: '1', name: 'B'})").unwrap();
    }

    #[test]
    fn create_index_backfills_existing_documents() {
        let (_dir, db) = database();
        db.execute_query("shop", "db.users.insert({_id: '1', age: 30})").unwrap();
        db.create_index("shop", "users", "age").unwrap();
        let manager = db.index_manager("shop").unwrap();
        assert_eq!(manager.find("users", "age", &json!(30)).unwrap(), vec!["1".to_string()]);
    }
}
