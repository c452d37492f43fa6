//! Bounded per-connection cache.
//!
//! One cache type covers both policies the connection needs: limit `0` is a
//! pure mapping that grows without bound, a positive limit `N` keeps the `N`
//! most recently used entries and evicts the least recently used on overflow.
//! Insertion and lookup both count as use.
//!
//! The cache never blocks on I/O; it is mutated only by its own connection's
//! transactions or by change propagation acting on that connection's behalf.

use cabinet_core::CollectionKey;
use lru::LruCache;
use std::num::NonZeroUsize;

/// LRU-evicting (or unbounded) mapping from `(collection, key)` to a cached
/// payload.
pub struct EntryCache<V> {
    inner: LruCache<CollectionKey, V>,
}

impl<V> EntryCache<V> {
    /// Create a cache. `limit == 0` disables eviction.
    pub fn new(limit: usize) -> Self {
        let inner = match NonZeroUsize::new(limit) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        EntryCache { inner }
    }

    /// Look up an entry, marking it most recently used.
    pub fn get(&mut self, key: &CollectionKey) -> Option<&V> {
        self.inner.get(key)
    }

    /// Presence check without touching recency.
    pub fn contains(&self, key: &CollectionKey) -> bool {
        self.inner.contains(key)
    }

    /// Insert or replace an entry, marking it most recently used.
    ///
    /// Evicts the least recently used entry when the cache is at its limit.
    pub fn put(&mut self, key: CollectionKey, value: V) {
        self.inner.put(key, value);
    }

    /// Drop one entry.
    pub fn invalidate(&mut self, key: &CollectionKey) {
        self.inner.pop(key);
    }

    /// Drop every entry under a collection name.
    pub fn invalidate_collection(&mut self, collection: &str) {
        let stale: Vec<CollectionKey> = self
            .inner
            .iter()
            .filter(|(ck, _)| ck.collection == collection)
            .map(|(ck, _)| ck.clone())
            .collect();
        for ck in stale {
            self.inner.pop(&ck);
        }
    }

    /// Drop everything.
    pub fn invalidate_all(&mut self) {
        self.inner.clear();
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
