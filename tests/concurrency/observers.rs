use std::sync::{Arc, Mutex};

use cabinetdb::prelude::*;

use crate::common::TestDb;

fn capture(db: &Arc<Database>) -> (ObserverId, Arc<Mutex<Vec<CapturedChanges>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let id = db.add_observer(move |changes: &ChangeSet| {
        sink.lock().unwrap().push(CapturedChanges {
            updated: changes.updated().iter().cloned().collect(),
            removed: changes.removed().iter().cloned().collect(),
            cleared: changes.cleared_collections().iter().cloned().collect(),
            all_cleared: changes.all_cleared(),
        });
    });
    (id, log)
}

#[derive(Debug)]
struct CapturedChanges {
    updated: Vec<CollectionKey>,
    removed: Vec<CollectionKey>,
    cleared: Vec<String>,
    all_cleared: bool,
}

#[test]
fn observer_sees_each_commit_once() {
    let db = TestDb::new();
    let (_id, log) = capture(&db.db);
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "a", Some(Value::Int(1)), None)?;
        txn.remove_object("users", "ghost")
    })
    .unwrap();

    let entries = log.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.updated, vec![CollectionKey::new("users", "a")]);
    // Removing a missing entity records nothing.
    assert!(entry.removed.is_empty());
    assert!(!entry.all_cleared);
}

#[test]
fn observer_sees_coalesced_changes() {
    let db = TestDb::new();
    let mut conn = db.conn();
    conn.read_write(|txn| {
        txn.set_object("users", "a", Some(Value::Int(1)), None)?;
        txn.set_object("posts", "p", Some(Value::Int(2)), None)
    })
    .unwrap();

    let (_id, log) = capture(&db.db);
    conn.read_write(|txn| {
        // The clear subsumes the per-key update within "users".
        txn.set_object("users", "a", Some(Value::Int(3)), None)?;
        txn.remove_all_in_collection("users")?;
        txn.set_object("posts", "p", Some(Value::Int(4)), None)
    })
    .unwrap();

    let entries = log.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.cleared, vec!["users".to_string()]);
    assert_eq!(entry.updated, vec![CollectionKey::new("posts", "p")]);
}

#[test]
fn observer_is_not_called_for_rollbacks() {
    let db = TestDb::new();
    let (_id, log) = capture(&db.db);
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "a", Some(Value::Int(1)), None)?;
        txn.rollback();
        Ok(())
    })
    .unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn removed_observer_stops_receiving() {
    let db = TestDb::new();
    let (id, log) = capture(&db.db);
    let mut conn = db.conn();

    conn.read_write(|txn| txn.set_object("users", "a", Some(Value::Int(1)), None))
        .unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);

    assert!(db.db.remove_observer(id));
    assert!(!db.db.remove_observer(id));

    conn.read_write(|txn| txn.set_object("users", "b", Some(Value::Int(2)), None))
        .unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn observer_runs_after_sibling_caches_are_synchronized() {
    let db = TestDb::new();
    let mut writer = db.conn();
    let mut reader = db.conn();

    writer
        .read_write(|txn| txn.set_object("docs", "d", Some(Value::Int(1)), None))
        .unwrap();
    reader
        .read(|txn| {
            txn.get_object("docs", "d")?;
            Ok(())
        })
        .unwrap();

    // By observer time the sibling's idle snapshot already includes the
    // commit, so a reaction transaction cannot read stale state.
    let reader = Arc::new(Mutex::new(reader));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let reader = Arc::clone(&reader);
        let seen = Arc::clone(&seen);
        db.db.add_observer(move |_changes| {
            let mut reader = reader.lock().unwrap();
            let value = reader
                .read(|txn| txn.get_object("docs", "d"))
                .unwrap();
            seen.lock().unwrap().push(value);
        });
    }

    writer
        .read_write(|txn| txn.set_object("docs", "d", Some(Value::Int(2)), None))
        .unwrap();

    assert_eq!(seen.lock().unwrap().as_slice(), &[Some(Value::Int(2))]);
}
