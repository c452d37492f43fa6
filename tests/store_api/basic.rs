use cabinetdb::prelude::*;

use crate::common::{obj, TestDb};

#[test]
fn set_and_get_round_trip() {
    let db = TestDb::new();
    let mut conn = db.conn();

    let user = obj(&[
        ("name", Value::from("ada")),
        ("age", Value::Int(36)),
        ("tags", Value::Array(vec![Value::from("admin")])),
    ]);
    let meta = obj(&[("ts", Value::Int(1_700_000_000))]);

    conn.read_write(|txn| {
        txn.set_object("users", "ada", Some(user.clone()), Some(meta.clone()))
    })
    .unwrap();

    let (got, got_meta) = conn
        .read(|txn| txn.get_object_and_metadata("users", "ada"))
        .unwrap()
        .expect("entity present");
    assert_eq!(got, user);
    assert_eq!(got_meta, Some(meta));
}

#[test]
fn missing_entity_reads_as_none() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read(|txn| {
        assert_eq!(txn.get_object("users", "nobody")?, None);
        assert_eq!(txn.get_metadata("users", "nobody")?, None);
        assert_eq!(txn.get_object_and_metadata("users", "nobody")?, None);
        assert!(!txn.has_object("users", "nobody")?);
        Ok(())
    })
    .unwrap();
}

#[test]
fn set_none_object_is_removal() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("docs", "a", Some(Value::from("draft")), None)?;
        txn.set_object("docs", "a", None, None)
    })
    .unwrap();

    conn.read(|txn| {
        assert!(!txn.has_object("docs", "a")?);
        assert_eq!(txn.key_count_in_collection("docs")?, 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn counts_track_inserts_and_removes() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "a", Some(Value::Int(1)), None)?;
        txn.set_object("users", "b", Some(Value::Int(2)), None)?;
        txn.set_object("posts", "p1", Some(Value::Int(3)), None)?;
        Ok(())
    })
    .unwrap();

    conn.read(|txn| {
        assert_eq!(txn.collection_count()?, 2);
        assert_eq!(txn.key_count_in_collection("users")?, 2);
        assert_eq!(txn.key_count_in_collection("posts")?, 1);
        assert_eq!(txn.key_count_all()?, 3);
        Ok(())
    })
    .unwrap();

    conn.read_write(|txn| txn.remove_object("users", "a")).unwrap();

    conn.read(|txn| {
        assert_eq!(txn.key_count_in_collection("users")?, 1);
        assert_eq!(txn.key_count_all()?, 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn emptied_collection_leaves_no_trace() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("scratch", "k", Some(Value::Bool(true)), None)
    })
    .unwrap();
    conn.read_write(|txn| txn.remove_object("scratch", "k")).unwrap();

    conn.read(|txn| {
        assert!(!txn.collections()?.iter().any(|c| c == "scratch"));
        assert_eq!(txn.collection_count()?, 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn remove_objects_and_clears() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        for key in ["a", "b", "c"] {
            txn.set_object("users", key, Some(Value::from(key)), None)?;
        }
        txn.set_object("posts", "p", Some(Value::Int(0)), None)?;
        Ok(())
    })
    .unwrap();

    conn.read_write(|txn| txn.remove_objects("users", &["a", "b"]))
        .unwrap();
    conn.read(|txn| {
        assert_eq!(txn.keys_in_collection("users")?, vec!["c".to_string()]);
        Ok(())
    })
    .unwrap();

    conn.read_write(|txn| txn.remove_all_in_collection("users"))
        .unwrap();
    conn.read(|txn| {
        assert_eq!(txn.key_count_in_collection("users")?, 0);
        assert_eq!(txn.key_count_all()?, 1);
        Ok(())
    })
    .unwrap();

    conn.read_write(|txn| txn.remove_all()).unwrap();
    conn.read(|txn| {
        assert_eq!(txn.key_count_all()?, 0);
        assert_eq!(txn.collection_count()?, 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn writes_visible_inside_their_own_transaction() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "new", Some(Value::Int(7)), None)?;
        assert_eq!(txn.get_object("users", "new")?, Some(Value::Int(7)));
        assert!(txn.has_object("users", "new")?);
        assert_eq!(txn.key_count_in_collection("users")?, 1);

        txn.remove_object("users", "new")?;
        assert_eq!(txn.get_object("users", "new")?, None);
        Ok(())
    })
    .unwrap();
}

#[test]
fn rollback_discards_staged_writes() {
    let db = TestDb::new();
    let mut conn = db.conn();

    conn.read_write(|txn| {
        txn.set_object("users", "kept", Some(Value::Int(1)), None)
    })
    .unwrap();
    let snapshot = db.db.snapshot();

    conn.read_write(|txn| {
        txn.set_object("users", "doomed", Some(Value::Int(2)), None)?;
        txn.remove_object("users", "kept")?;
        txn.rollback();
        Ok(())
    })
    .unwrap();

    assert_eq!(db.db.snapshot(), snapshot);
    conn.read(|txn| {
        assert!(!txn.has_object("users", "doomed")?);
        assert_eq!(txn.get_object("users", "kept")?, Some(Value::Int(1)));
        Ok(())
    })
    .unwrap();
}

#[test]
fn closure_error_rolls_back() {
    let db = TestDb::new();
    let mut conn = db.conn();

    let err = conn
        .read_write(|txn| {
            txn.set_object("users", "x", Some(Value::Int(1)), None)?;
            Err::<(), _>(Error::InvalidOperation("boom".into()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    conn.read(|txn| {
        assert!(!txn.has_object("users", "x")?);
        Ok(())
    })
    .unwrap();
}

#[test]
fn primitive_data_bypasses_the_codec() {
    let db = TestDb::new();
    let mut conn = db.conn();

    // 0xc1 is reserved in msgpack, so this blob cannot decode.
    let raw: &[u8] = &[0xc1, 0x00, 0xff];
    conn.read_write(|txn| {
        txn.set_primitive_data("blobs", "raw", Some(raw), Some(Value::Int(9)))
    })
    .unwrap();

    conn.read(|txn| {
        assert_eq!(txn.get_primitive_data("blobs", "raw")?, Some(raw.to_vec()));
        assert_eq!(txn.get_metadata("blobs", "raw")?, Some(Value::Int(9)));
        assert!(txn.has_object("blobs", "raw")?);
        Ok(())
    })
    .unwrap();

    let err = conn
        .read(|txn| txn.get_object("blobs", "raw"))
        .unwrap_err();
    assert!(err.is_decode());

    // A decode failure must not poison the cache with a phantom value.
    let err = conn
        .read(|txn| txn.get_object("blobs", "raw"))
        .unwrap_err();
    assert!(err.is_decode());
}

#[test]
fn tiny_cache_limits_never_change_results() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = Database::builder()
        .path(dir.path().join("tiny.cabinet"))
        .object_cache_limit(2)
        .metadata_cache_limit(2)
        .open()
        .unwrap();
    let mut conn = db.new_connection().unwrap();

    conn.read_write(|txn| {
        for i in 0..50 {
            txn.set_object(
                "items",
                &i.to_string(),
                Some(Value::Int(i)),
                Some(Value::Int(-i)),
            )?;
        }
        Ok(())
    })
    .unwrap();

    // Far more entries than the cache holds; every read must still be exact.
    conn.read(|txn| {
        for i in 0..50 {
            let key = i.to_string();
            assert_eq!(txn.get_object("items", &key)?, Some(Value::Int(i)));
            assert_eq!(txn.get_metadata("items", &key)?, Some(Value::Int(-i)));
        }
        assert_eq!(txn.key_count_in_collection("items")?, 50);
        Ok(())
    })
    .unwrap();
}

#[test]
fn closed_connection_rejects_transactions() {
    let db = TestDb::new();
    let mut conn = db.conn();
    conn.close();

    let err = conn.read(|_txn| Ok(())).unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    let err = conn.read_write(|_txn| Ok(())).unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("persist.cabinet");

    {
        let db = Database::open(&path).unwrap();
        let mut conn = db.new_connection().unwrap();
        conn.read_write(|txn| {
            txn.set_object("users", "ada", Some(Value::from("ada")), None)
        })
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let mut conn = db.new_connection().unwrap();
    conn.read(|txn| {
        assert_eq!(txn.get_object("users", "ada")?, Some(Value::from("ada")));
        Ok(())
    })
    .unwrap();
}
