//! End-to-end scenarios exercising a real temp-directory database through
//! the public `Database` facade, one per scenario from the design notes.

mod common;

use docdb_core::{Config, CoreError, Database, ExecResult};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open() -> (TempDir, Database) {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path(), Config::default()).unwrap();
    (dir, db)
}

#[test]
fn insert_auto_assigns_id_and_reads_back() {
    let (_dir, db) = open();
    db.create_database("shop").unwrap();
    db.create_collection("shop", "users").unwrap();

    let ExecResult::Inserted(inserted) = db.execute_query("shop", "db.users.insert({name: 'A', age: 20})").unwrap()
    else {
        panic!("expected Inserted");
    };
    let id = inserted.get("_id").and_then(|v| v.as_str()).expect("auto-assigned _id");
    assert!(!id.is_empty());

    let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({})").unwrap() else {
        panic!("expected Found");
    };
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], json!("A"));
    assert_eq!(found[0]["age"], json!(20));
}

#[test]
fn duplicate_id_is_rejected_leaving_one_document() {
    let (_dir, db) = open();
    db.create_database("shop").unwrap();
    db.create_collection("shop", "users").unwrap();

    db.execute_query("shop", "db.users.insert({_id: 'x', name: 'A'})").unwrap();
    let err = db.execute_query("shop", "db.users.insert({_id: 'x', name: 'B'})").unwrap_err();
    assert_eq!(err.message(), "Duplicate value for unique field '_id'");

    let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({})").unwrap() else {
        panic!("expected Found");
    };
    assert_eq!(found.len(), 1);
}

#[test]
fn concurrent_updates_resolve_to_exactly_one_winner() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path(), Config::default()).unwrap());
    db.create_database("shop").unwrap();
    db.create_collection("shop", "users").unwrap();
    db.execute_query("shop", "db.users.insert({_id: '1', name: 'A', age: 0})").unwrap();

    let db1 = db.clone();
    let t1 = thread::spawn(move || db1.execute_query("shop", "db.users.update({name: 'A'}, {$set: {age: 1}})"));
    let db2 = db.clone();
    let t2 = thread::spawn(move || db2.execute_query("shop", "db.users.update({name: 'A'}, {$set: {age: 2}})"));

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();

    let outcomes = [r1, r2];
    let oks = outcomes.iter().filter(|r| r.is_ok()).count();
    let errs: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(oks, outcomes.len() - errs.len());
    assert!(oks >= 1, "at least one update must win");
    for err in &errs {
        let msg = err.message();
        assert!(
            msg == "Deadlock detected" || msg == "Lock acquisition failed - waiting",
            "unexpected failure mode: {msg}"
        );
    }

    let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({_id: '1'})").unwrap() else {
        panic!("expected Found");
    };
    let age = found[0]["age"].as_i64().unwrap();
    assert!(age == 1 || age == 2);
}

#[test]
fn batch_duplicate_id_aborts_whole_batch_leaving_zero_documents() {
    let (_dir, db) = open();
    db.create_database("shop").unwrap();
    db.create_collection("shop", "c").unwrap();

    let err = db
        .execute_batch("shop", "db.c.insert({_id: '1'}); db.c.insert({_id: '1'})")
        .unwrap_err();
    assert!(matches!(err, CoreError::BatchError(_)));
    assert_eq!(err.message(), "Query 2 failed: Duplicate value for unique field '_id'");

    let ExecResult::Found(found) = db.execute_query("shop", "db.c.find({})").unwrap() else {
        panic!("expected Found");
    };
    assert!(found.is_empty(), "batch failure must leave no documents behind");

    // the rolled-back _id claim must be reusable by a later, independent call
    db.execute_query("shop", "db.c.insert({_id: '1'})").unwrap();
}

#[test]
fn unique_secondary_index_rejects_duplicate_and_find_returns_one_match() {
    let (_dir, db) = open();
    db.create_database("shop").unwrap();
    db.create_collection("shop", "users").unwrap();
    db.create_index("shop", "users", "email").unwrap();

    db.execute_query("shop", "db.users.insert({_id: 'a', email: 'x@y'})").unwrap();
    let err = db.execute_query("shop", "db.users.insert({_id: 'b', email: 'x@y'})").unwrap_err();
    assert_eq!(err.message(), "Duplicate value for unique field 'email'");

    let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({email: 'x@y'})").unwrap() else {
        panic!("expected Found");
    };
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["_id"], json!("a"));
}

#[test]
fn crash_before_commit_is_undone_and_wal_compacts_past_checkpoint() {
    use docdb_core::{IsolationLevel, TransactionManager, WalRecord, WalWriter};
    use docdb_storage::Layout;

    let dir = TempDir::new().unwrap();
    let layout = Arc::new(Layout::new(dir.path()).unwrap());
    layout.create_database("shop").unwrap();
    layout.create_collection_file("shop", "users").unwrap();
    layout.save_collection("shop", "users", &[json!({"_id": "1", "name": "ada"})]).unwrap();

    // Simulate a crash between `log_operation` and the collection write of an
    // uncommitted transaction: the WAL records an update whose `after_state`
    // never actually landed on disk.
    let wal = Arc::new(WalWriter::new(layout.clone()));
    let config = Config::default();
    let transactions = Arc::new(TransactionManager::new(&config, wal.clone()));
    let txn = transactions.begin(IsolationLevel::RepeatableRead);
    wal.append(
        "shop",
        &WalRecord::new(
            txn,
            "update",
            "shop",
            Some("users".to_string()),
            Some("1".to_string()),
            Some(json!({"_id": "1", "name": "ada"})),
            Some(json!({"_id": "1", "name": "grace"})),
            IsolationLevel::RepeatableRead,
        ),
    )
    .unwrap();
    drop(wal);
    drop(transactions);

    // Restart: `Database::open` recovers this database before returning.
    let db = Database::open(dir.path(), Config::default()).unwrap();
    let ExecResult::Found(found) = db.execute_query("shop", "db.users.find({})").unwrap() else {
        panic!("expected Found");
    };
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], json!("ada"), "uncommitted update must be undone");

    db.checkpoint_now().unwrap();
    // A fresh checkpoint with no active transactions compacts the WAL to empty.
    let db2 = Database::open(dir.path(), Config::default()).unwrap();
    let ExecResult::Found(found_again) = db2.execute_query("shop", "db.users.find({})").unwrap() else {
        panic!("expected Found");
    };
    assert_eq!(found_again[0]["name"], json!("ada"));
}
