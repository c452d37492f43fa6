//! Change set accumulated by a write transaction.
//!
//! Created at transaction start, finalized at commit, consumed once by change
//! propagation, then handed to observers. A rolled-back transaction's change
//! set is used only to discard the writer's own speculative cache entries.

use cabinet_core::CollectionKey;
use std::collections::{BTreeSet, HashSet};

/// The diff of one write transaction: inserted/updated keys, removed keys,
/// wholly cleared collections, and the "everything cleared" flag.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    updated: HashSet<CollectionKey>,
    removed: HashSet<CollectionKey>,
    cleared_collections: HashSet<String>,
    all_cleared: bool,
}

impl ChangeSet {
    /// Empty change set for a freshly begun transaction.
    pub fn new() -> Self {
        ChangeSet::default()
    }

    /// Record an insert or update of `(collection, key)`.
    pub fn record_update(&mut self, ck: CollectionKey) {
        self.removed.remove(&ck);
        self.updated.insert(ck);
    }

    /// Record a removal of `(collection, key)`.
    pub fn record_remove(&mut self, ck: CollectionKey) {
        self.updated.remove(&ck);
        self.removed.insert(ck);
    }

    /// Record a full clear of one collection.
    ///
    /// Subsumes any per-key changes recorded earlier for that collection.
    pub fn record_clear_collection(&mut self, collection: &str) {
        self.updated.retain(|ck| ck.collection != collection);
        self.removed.retain(|ck| ck.collection != collection);
        self.cleared_collections.insert(collection.to_owned());
    }

    /// Record a clear of the entire database.
    ///
    /// Subsumes everything recorded earlier.
    pub fn record_clear_all(&mut self) {
        self.updated.clear();
        self.removed.clear();
        self.cleared_collections.clear();
        self.all_cleared = true;
    }

    /// Inserted or updated keys.
    pub fn updated(&self) -> &HashSet<CollectionKey> {
        &self.updated
    }

    /// Removed keys.
    pub fn removed(&self) -> &HashSet<CollectionKey> {
        &self.removed
    }

    /// Collections cleared in full.
    pub fn cleared_collections(&self) -> &HashSet<String> {
        &self.cleared_collections
    }

    /// Whether every collection was cleared.
    pub fn all_cleared(&self) -> bool {
        self.all_cleared
    }

    /// Whether this transaction changed nothing.
    pub fn is_empty(&self) -> bool {
        !self.all_cleared
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.cleared_collections.is_empty()
    }

    /// Sorted names of every collection this change set touches.
    pub fn touched_collections(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = BTreeSet::new();
        out.extend(self.updated.iter().map(|ck| ck.collection.as_str()));
        out.extend(self.removed.iter().map(|ck| ck.collection.as_str()));
        out.extend(self.cleared_collections.iter().map(String::as_str));
        out
    }
}
