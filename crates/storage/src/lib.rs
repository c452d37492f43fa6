//! Storage layer for cabinetdb
//!
//! This crate wraps the embedded SQLite engine behind the statement surface
//! the engine needs:
//! - parameterized get/set/remove/count statements keyed by `(collection, key)`
//! - cursor-style enumeration with early termination
//! - transaction begin/commit/rollback with WAL-mode reader isolation
//!
//! Every statement is parameterized; no untrusted value is ever concatenated
//! into SQL. Statements are prepared lazily on first use and reused across
//! transactions through the connection's prepared-statement cache.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sqlite;

pub use sqlite::SqliteBackend;
