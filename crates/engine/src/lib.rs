//! Connection/transaction engine for cabinetdb
//!
//! This crate implements the concurrency core of the store:
//! - [`Database`]: shared handle owning the snapshot counter, the global
//!   write-serialization lock, the connection registry, and observers
//! - [`Connection`]: a per-client handle with its own storage backend, its
//!   own object/metadata caches, and strictly sequential transactions
//! - [`ReadTransaction`] / [`WriteTransaction`]: the operation surface
//! - [`ChangeSet`]: the diff one committed write hands to change propagation
//!
//! Concurrency model: unbounded concurrent read transactions, at most one
//! active write transaction (global write lock), snapshot counter advanced
//! exactly once per committed write, sibling caches invalidated before their
//! next transaction begins.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod changeset;
pub mod connection;
pub mod database;
pub mod transaction;

pub use cache::EntryCache;
pub use changeset::ChangeSet;
pub use connection::Connection;
pub use database::{Database, DatabaseBuilder, ObserverId, DEFAULT_CACHE_LIMIT};
pub use transaction::{ReadTransaction, WriteTransaction};
