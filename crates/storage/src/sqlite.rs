//! SQLite statement surface.
//!
//! One [`SqliteBackend`] wraps one SQLite connection to the shared database
//! file. Each store connection owns its own backend; WAL mode lets one writer
//! proceed while readers keep a prior consistent view of the file.
//!
//! Schema: a single `objects` table keyed by `(collection, key)` with a
//! mandatory `data` blob and a nullable `metadata` blob. Collections exist
//! only as distinct values of the `collection` column.

use cabinet_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

/// Rows of prepared-statement cache kept per connection.
///
/// Covers the full statement set (counts, gets, sets, removes, enumerations)
/// so statements survive across transactions once first used.
const STATEMENT_CACHE_CAPACITY: usize = 24;

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// One SQLite connection plus the parameterized statement set.
///
/// Not shared between store connections; the engine layer serializes all
/// access through its own transaction discipline.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (and create if needed) the database file at `path`.
    ///
    /// Configures WAL journaling and a busy timeout, sizes the statement
    /// cache, and creates the schema if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(sql_err)?;

        // WAL gives readers a stable view while a writer proceeds.
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(sql_err)?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(mode = %mode, "WAL journal mode unavailable, concurrent readers will block");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sql_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS objects (
                 collection TEXT NOT NULL,
                 key        TEXT NOT NULL,
                 data       BLOB NOT NULL,
                 metadata   BLOB,
                 PRIMARY KEY (collection, key)
             )",
        )
        .map_err(sql_err)?;

        Ok(SqliteBackend { conn })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a read transaction and pin its snapshot.
    ///
    /// `BEGIN DEFERRED` alone acquires nothing; the first read does. A probe
    /// read is issued immediately so the snapshot is fixed at begin, not at
    /// the first caller-visible operation.
    pub fn begin_read(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN DEFERRED").map_err(sql_err)?;
        let _: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM objects LIMIT 1", [], |row| row.get(0))
            .optional()
            .map_err(sql_err)?;
        Ok(())
    }

    /// Begin a write transaction (`BEGIN IMMEDIATE`).
    pub fn begin_write(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(sql_err)
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(sql_err)
    }

    /// Roll back the open transaction.
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(sql_err)
    }

    // ========================================================================
    // Counts and lists
    // ========================================================================

    /// Number of distinct collections.
    pub fn count_collections(&self) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(DISTINCT collection) FROM objects")
            .map_err(sql_err)?;
        stmt.query_row([], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(sql_err)
    }

    /// Number of keys in one collection.
    pub fn count_keys_in_collection(&self, collection: &str) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        stmt.query_row(params![collection], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(sql_err)
    }

    /// Number of keys across all collections.
    pub fn count_keys_all(&self) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM objects")
            .map_err(sql_err)?;
        stmt.query_row([], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(sql_err)
    }

    /// All collection names, sorted.
    pub fn collections(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT collection FROM objects ORDER BY collection ASC")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
    }

    /// All keys in one collection.
    pub fn keys_in_collection(&self, collection: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
    }

    // ========================================================================
    // Point reads
    // ========================================================================

    /// Raw data bytes for a key, if the row exists.
    pub fn get_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM objects WHERE collection = ?1 AND key = ?2")
            .map_err(sql_err)?;
        stmt.query_row(params![collection, key], |row| row.get::<_, Vec<u8>>(0))
            .optional()
            .map_err(sql_err)
    }

    /// Metadata bytes for a key.
    ///
    /// Outer `None` means the row does not exist; inner `None` means the row
    /// exists with no metadata.
    pub fn get_metadata(&self, collection: &str, key: &str) -> Result<Option<Option<Vec<u8>>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT metadata FROM objects WHERE collection = ?1 AND key = ?2")
            .map_err(sql_err)?;
        stmt.query_row(params![collection, key], |row| {
            row.get::<_, Option<Vec<u8>>>(0)
        })
        .optional()
        .map_err(sql_err)
    }

    /// Data and metadata bytes for a key in one statement.
    #[allow(clippy::type_complexity)]
    pub fn get_row(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data, metadata FROM objects WHERE collection = ?1 AND key = ?2")
            .map_err(sql_err)?;
        stmt.query_row(params![collection, key], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
        })
        .optional()
        .map_err(sql_err)
    }

    /// Whether a row exists for `(collection, key)`.
    pub fn has_row(&self, collection: &str, key: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM objects WHERE collection = ?1 AND key = ?2 LIMIT 1")
            .map_err(sql_err)?;
        stmt.query_row(params![collection, key], |row| row.get::<_, i64>(0))
            .optional()
            .map(|hit| hit.is_some())
            .map_err(sql_err)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Upsert a full row.
    pub fn set_row(
        &self,
        collection: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&[u8]>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT OR REPLACE INTO objects (collection, key, data, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(sql_err)?;
        stmt.execute(params![collection, key, data, metadata])
            .map_err(sql_err)?;
        Ok(())
    }

    /// Update only the metadata column of an existing row.
    ///
    /// Returns the number of rows touched: zero when the entity is absent.
    pub fn set_metadata(
        &self,
        collection: &str,
        key: &str,
        metadata: Option<&[u8]>,
    ) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE objects SET metadata = ?3 WHERE collection = ?1 AND key = ?2")
            .map_err(sql_err)?;
        stmt.execute(params![collection, key, metadata])
            .map_err(sql_err)
    }

    /// Delete one row. Returns the number of rows removed (0 or 1).
    pub fn remove_row(&self, collection: &str, key: &str) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM objects WHERE collection = ?1 AND key = ?2")
            .map_err(sql_err)?;
        stmt.execute(params![collection, key]).map_err(sql_err)
    }

    /// Delete every row in a collection. Returns the number removed.
    pub fn remove_collection(&self, collection: &str) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        stmt.execute(params![collection]).map_err(sql_err)
    }

    /// Delete every row in every collection. Returns the number removed.
    pub fn remove_all(&self) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM objects")
            .map_err(sql_err)?;
        stmt.execute([]).map_err(sql_err)
    }

    // ========================================================================
    // Enumeration cursors
    // ========================================================================
    //
    // Each cursor steps a SELECT statement and hands raw column values to the
    // callback. The callback decides about decoding and may stop the cursor
    // by returning `ControlFlow::Break`.

    /// Step over every key in a collection.
    pub fn for_each_key(
        &self,
        collection: &str,
        mut f: impl FnMut(&str) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        let mut rows = stmt.query(params![collection]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let key: String = row.get(0).map_err(sql_err)?;
            if f(&key)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Step over `(key, metadata)` for every row in a collection.
    pub fn for_each_key_and_metadata(
        &self,
        collection: &str,
        mut f: impl FnMut(&str, Option<&[u8]>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, metadata FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        let mut rows = stmt.query(params![collection]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let key: String = row.get(0).map_err(sql_err)?;
            let metadata: Option<Vec<u8>> = row.get(1).map_err(sql_err)?;
            if f(&key, metadata.as_deref())?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Step over `(collection, key, metadata)` for every row, collection-major.
    pub fn for_each_key_and_metadata_all(
        &self,
        mut f: impl FnMut(&str, &str, Option<&[u8]>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT collection, key, metadata FROM objects ORDER BY collection ASC")
            .map_err(sql_err)?;
        let mut rows = stmt.query([]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let collection: String = row.get(0).map_err(sql_err)?;
            let key: String = row.get(1).map_err(sql_err)?;
            let metadata: Option<Vec<u8>> = row.get(2).map_err(sql_err)?;
            if f(&collection, &key, metadata.as_deref())?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Step over `(key, data, metadata)` for every row in a collection.
    pub fn for_each_row(
        &self,
        collection: &str,
        mut f: impl FnMut(&str, &[u8], Option<&[u8]>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, data, metadata FROM objects WHERE collection = ?1")
            .map_err(sql_err)?;
        let mut rows = stmt.query(params![collection]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let key: String = row.get(0).map_err(sql_err)?;
            let data: Vec<u8> = row.get(1).map_err(sql_err)?;
            let metadata: Option<Vec<u8>> = row.get(2).map_err(sql_err)?;
            if f(&key, &data, metadata.as_deref())?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Step over `(collection, key, data, metadata)` for every row,
    /// collection-major.
    pub fn for_each_row_all(
        &self,
        mut f: impl FnMut(&str, &str, &[u8], Option<&[u8]>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT collection, key, data, metadata FROM objects ORDER BY collection ASC",
            )
            .map_err(sql_err)?;
        let mut rows = stmt.query([]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let collection: String = row.get(0).map_err(sql_err)?;
            let key: String = row.get(1).map_err(sql_err)?;
            let data: Vec<u8> = row.get(2).map_err(sql_err)?;
            let metadata: Option<Vec<u8>> = row.get(3).map_err(sql_err)?;
            if f(&collection, &key, &data, metadata.as_deref())?.is_break() {
                break;
            }
        }
        Ok(())
    }
}
