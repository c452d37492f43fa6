use cabinetdb::prelude::*;

use crate::common::{obj, CountingCodec, TestDb};
use std::sync::atomic::Ordering;

#[test]
fn absent_metadata_is_distinct_from_absent_entity() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| txn.set_object("users", "bare", Some(Value::Int(1)), None))
        .unwrap();

    conn.read(|txn| {
        assert!(txn.has_object("users", "bare")?);
        assert_eq!(txn.get_metadata("users", "bare")?, None);
        assert_eq!(
            txn.get_object_and_metadata("users", "bare")?,
            Some((Value::Int(1), None))
        );
        Ok(())
    })
    .unwrap();
}

#[test]
fn set_metadata_updates_metadata_only() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "ada", Some(Value::from("ada")), Some(Value::Int(1)))
    })
    .unwrap();
    conn.read_write(|txn| txn.set_metadata("users", "ada", Some(Value::Int(2))))
        .unwrap();

    conn.read(|txn| {
        assert_eq!(txn.get_object("users", "ada")?, Some(Value::from("ada")));
        assert_eq!(txn.get_metadata("users", "ada")?, Some(Value::Int(2)));
        Ok(())
    })
    .unwrap();
}

#[test]
fn set_metadata_on_missing_entity_is_a_noop() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_metadata("users", "ghost", Some(Value::Int(1)))?;
        assert!(txn.changes().is_empty());
        Ok(())
    })
    .unwrap();

    conn.read(|txn| {
        assert!(!txn.has_object("users", "ghost")?);
        assert_eq!(txn.get_metadata("users", "ghost")?, None);
        Ok(())
    })
    .unwrap();
}

#[test]
fn set_metadata_none_clears_it() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "ada", Some(Value::Int(1)), Some(Value::Int(1)))
    })
    .unwrap();
    conn.read_write(|txn| txn.set_metadata("users", "ada", None))
        .unwrap();

    conn.read(|txn| {
        assert_eq!(txn.get_metadata("users", "ada")?, None);
        assert_eq!(txn.get_object("users", "ada")?, Some(Value::Int(1)));
        Ok(())
    })
    .unwrap();
}

#[test]
fn metadata_fetch_does_not_deserialize_the_object() {
    let (codec, decodes) = CountingCodec::new();
    let db = TestDb::with_codec(codec);

    let meta = obj(&[("ts", Value::Int(42))]);
    {
        let mut conn = db.conn();
        conn.read_write(|txn| {
            txn.set_object("users", "ada", Some(Value::from("big")), Some(meta.clone()))
        })
        .unwrap();
    }

    // Fresh connection, cold caches.
    let mut conn = db.conn();
    decodes.store(0, Ordering::SeqCst);
    conn.read(|txn| {
        assert_eq!(txn.get_metadata("users", "ada")?, Some(meta.clone()));
        Ok(())
    })
    .unwrap();
    assert_eq!(decodes.load(Ordering::SeqCst), 1);
}

#[test]
fn cached_metadata_is_served_without_decoding() {
    let (codec, decodes) = CountingCodec::new();
    let db = TestDb::with_codec(codec);
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "ada", Some(Value::Int(1)), Some(Value::Int(9)))
    })
    .unwrap();

    decodes.store(0, Ordering::SeqCst);
    conn.read(|txn| {
        // Both halves were populated by the write; no blob is touched.
        assert_eq!(txn.get_metadata("users", "ada")?, Some(Value::Int(9)));
        assert_eq!(txn.get_object("users", "ada")?, Some(Value::Int(1)));
        Ok(())
    })
    .unwrap();
    assert_eq!(decodes.load(Ordering::SeqCst), 0);
}
