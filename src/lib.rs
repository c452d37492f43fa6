//! # cabinetdb
//!
//! Embedded collection-and-key addressed object store layered on SQLite.
//!
//! One process opens one [`Database`]; each thread opens its own
//! [`Connection`]. Connections run strictly sequential transactions: any
//! number of concurrent readers across connections, at most one writer
//! database-wide. Every connection carries a bounded object/metadata cache
//! kept coherent by change propagation after each commit.
//!
//! ## Quick start
//!
//! ```ignore
//! use cabinetdb::prelude::*;
//!
//! let db = Database::open("./store.db")?;
//! let mut conn = db.new_connection()?;
//!
//! conn.read_write(|txn| {
//!     txn.set_object("users", "1", Some(Value::from("alice")), None)
//! })?;
//!
//! let name = conn.read(|txn| txn.get_object("users", "1"))?;
//! ```
//!
//! ## Guarantees
//!
//! - A read transaction observes one snapshot for its whole duration, even
//!   across a concurrent commit.
//! - A write transaction observes its own uncommitted writes.
//! - After a commit, every other connection's cache is invalidated for
//!   exactly the touched keys before its next transaction begins.
//! - Registered observers receive each commit's [`ChangeSet`] once, after
//!   propagation.

#![warn(missing_docs)]

pub mod prelude;

pub use cabinet_core::{
    CollectionKey, Error, MsgpackCodec, Result, Snapshot, Value, ValueCodec,
};
pub use cabinet_engine::{
    ChangeSet, Connection, Database, DatabaseBuilder, ObserverId, ReadTransaction,
    WriteTransaction, DEFAULT_CACHE_LIMIT,
};
