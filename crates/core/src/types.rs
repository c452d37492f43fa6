//! Fundamental addressing types.
//!
//! Every entity in the store is identified by a [`CollectionKey`]: the pair
//! of a collection name and a key, unique within the database. Collections
//! exist implicitly while they have at least one member; no collection record
//! is ever persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical database version.
///
/// Strictly increasing, advanced exactly once per committed read-write
/// transaction. Never advanced by a read transaction or a rolled-back write.
pub type Snapshot = u64;

/// The `(collection, key)` pair addressing one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    /// Namespace the key lives in.
    pub collection: String,
    /// Key, unique within its collection.
    pub key: String,
}

impl CollectionKey {
    /// Create a new collection/key pair.
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        CollectionKey {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl From<(&str, &str)> for CollectionKey {
    fn from((collection, key): (&str, &str)) -> Self {
        CollectionKey::new(collection, key)
    }
}
