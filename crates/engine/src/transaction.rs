//! Transaction operation surface.
//!
//! [`ReadTransaction`] exposes every read-only operation; [`WriteTransaction`]
//! derefs to it and adds the mutating operations plus the change set they
//! accumulate. Both are handed to the caller by [`crate::Connection::read`]
//! and [`crate::Connection::read_write`] and live only for the closure.
//!
//! Reads route through the connection's caches and fall back to the storage
//! backend on miss. Writes update the backend and the caches synchronously,
//! so reads later in the same transaction observe the uncommitted writes.
//!
//! ## Enumeration
//!
//! Enumeration steps a stable backend cursor; the caches are consulted per
//! row only to skip decode work, so a cache eviction mid-enumeration cannot
//! skip or repeat rows. Callbacks return [`ControlFlow`] to stop early. The
//! `_filtered` variants run the predicate before any deserialization.
//!
//! Structurally mutating a collection while enumerating it is impossible
//! through this API: the enumeration borrows the transaction mutably, so the
//! callback cannot reach the mutating operations.
//!
//! Key-list enumeration (`*_for_keys`) visits cache-resident entries first
//! and backend-resident ones after; the visit order is explicitly NOT the
//! caller's input order. Each invocation carries the index into the caller's
//! key slice.

use crate::changeset::ChangeSet;
use crate::connection::ConnectionShared;
use cabinet_core::{CollectionKey, Result, Snapshot, Value, ValueCodec};
use cabinet_storage::SqliteBackend;
use std::ops::{ControlFlow, Deref, DerefMut};
use std::sync::Arc;

/// A read-only transaction, consistent with the snapshot recorded at begin.
pub struct ReadTransaction<'a> {
    backend: &'a SqliteBackend,
    shared: &'a ConnectionShared,
    codec: Arc<dyn ValueCodec>,
    snapshot: Snapshot,
}

impl<'a> ReadTransaction<'a> {
    pub(crate) fn new(
        backend: &'a SqliteBackend,
        shared: &'a ConnectionShared,
        codec: Arc<dyn ValueCodec>,
        snapshot: Snapshot,
    ) -> Self {
        ReadTransaction {
            backend,
            shared,
            codec,
            snapshot,
        }
    }

    /// Snapshot this transaction reads at.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    // ========================================================================
    // Counts and lists
    // ========================================================================

    /// Total number of collections.
    pub fn collection_count(&mut self) -> Result<u64> {
        self.backend.count_collections()
    }

    /// Number of keys in the given collection. Zero if it doesn't exist.
    pub fn key_count_in_collection(&mut self, collection: &str) -> Result<u64> {
        self.backend.count_keys_in_collection(collection)
    }

    /// Number of keys across every collection.
    pub fn key_count_all(&mut self) -> Result<u64> {
        self.backend.count_keys_all()
    }

    /// All collection names, sorted.
    pub fn collections(&mut self) -> Result<Vec<String>> {
        self.backend.collections()
    }

    /// All keys in the given collection.
    pub fn keys_in_collection(&mut self, collection: &str) -> Result<Vec<String>> {
        self.backend.keys_in_collection(collection)
    }

    // ========================================================================
    // Point reads
    // ========================================================================

    /// Raw stored bytes for a key, bypassing the codec and the caches.
    ///
    /// For irregular data that shouldn't go through the configured
    /// serializer.
    pub fn get_primitive_data(&mut self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get_data(collection, key)
    }

    /// The object stored under `(collection, key)`, deserialized.
    pub fn get_object(&mut self, collection: &str, key: &str) -> Result<Option<Value>> {
        let ck = CollectionKey::new(collection, key);
        if let Some(value) = self.shared.state.lock().object_cache.get(&ck) {
            return Ok(Some(value.clone()));
        }
        let Some(bytes) = self.backend.get_data(collection, key)? else {
            return Ok(None);
        };
        let value = self.codec.decode(&bytes)?;
        self.shared
            .state
            .lock()
            .object_cache
            .put(ck, value.clone());
        Ok(Some(value))
    }

    /// The metadata stored under `(collection, key)`.
    ///
    /// `None` when the entity is missing or carries no metadata; a metadata
    /// read never deserializes the object.
    pub fn get_metadata(&mut self, collection: &str, key: &str) -> Result<Option<Value>> {
        let ck = CollectionKey::new(collection, key);
        if let Some(metadata) = self.shared.state.lock().metadata_cache.get(&ck) {
            return Ok(metadata.clone());
        }
        let Some(stored) = self.backend.get_metadata(collection, key)? else {
            // Missing entities are not negatively cached.
            return Ok(None);
        };
        let metadata = stored.map(|bytes| self.codec.decode(&bytes)).transpose()?;
        self.shared
            .state
            .lock()
            .metadata_cache
            .put(ck, metadata.clone());
        Ok(metadata)
    }

    /// Whether `(collection, key)` exists.
    pub fn has_object(&mut self, collection: &str, key: &str) -> Result<bool> {
        let ck = CollectionKey::new(collection, key);
        {
            let state = self.shared.state.lock();
            if state.object_cache.contains(&ck) || state.metadata_cache.contains(&ck) {
                return Ok(true);
            }
        }
        self.backend.has_row(collection, key)
    }

    /// Object and metadata in a single fetch.
    ///
    /// Reuses whichever half is already cached, deserializing only the rest.
    pub fn get_object_and_metadata(
        &mut self,
        collection: &str,
        key: &str,
    ) -> Result<Option<(Value, Option<Value>)>> {
        let ck = CollectionKey::new(collection, key);
        let (cached_value, cached_metadata) = {
            let mut state = self.shared.state.lock();
            (
                state.object_cache.get(&ck).cloned(),
                state.metadata_cache.get(&ck).cloned(),
            )
        };
        if let (Some(value), Some(metadata)) = (&cached_value, &cached_metadata) {
            return Ok(Some((value.clone(), metadata.clone())));
        }

        let Some((data, meta_bytes)) = self.backend.get_row(collection, key)? else {
            return Ok(None);
        };
        let value = match cached_value {
            Some(value) => value,
            None => self.codec.decode(&data)?,
        };
        let metadata = match cached_metadata {
            Some(metadata) => metadata,
            None => meta_bytes
                .map(|bytes| self.codec.decode(&bytes))
                .transpose()?,
        };
        {
            let mut state = self.shared.state.lock();
            state.object_cache.put(ck.clone(), value.clone());
            state.metadata_cache.put(ck, metadata.clone());
        }
        Ok(Some((value, metadata)))
    }

    // ========================================================================
    // Enumeration: whole collection / whole database
    // ========================================================================

    /// Visit every key in a collection.
    pub fn for_each_key_in_collection(
        &mut self,
        collection: &str,
        mut f: impl FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        self.backend.for_each_key(collection, |key| Ok(f(key)))
    }

    /// Visit `(key, metadata)` for every entity in a collection.
    pub fn for_each_key_and_metadata(
        &mut self,
        collection: &str,
        mut f: impl FnMut(&str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_metadata(collection, None, &mut f)
    }

    /// Like [`Self::for_each_key_and_metadata`], with a predicate checked
    /// before the metadata is deserialized.
    pub fn for_each_key_and_metadata_filtered(
        &mut self,
        collection: &str,
        mut filter: impl FnMut(&str) -> bool,
        mut f: impl FnMut(&str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_metadata(collection, Some(&mut filter), &mut f)
    }

    /// Visit `(collection, key, metadata)` for every entity, collection-major.
    pub fn for_each_key_and_metadata_in_all_collections(
        &mut self,
        mut f: impl FnMut(&str, &str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_metadata_all(None, &mut f)
    }

    /// Like [`Self::for_each_key_and_metadata_in_all_collections`], with a
    /// predicate checked before deserialization.
    pub fn for_each_key_and_metadata_in_all_collections_filtered(
        &mut self,
        mut filter: impl FnMut(&str, &str) -> bool,
        mut f: impl FnMut(&str, &str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_metadata_all(Some(&mut filter), &mut f)
    }

    /// Visit `(key, object, metadata)` for every entity in a collection.
    pub fn for_each_entry(
        &mut self,
        collection: &str,
        mut f: impl FnMut(&str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_entries(collection, None, &mut f)
    }

    /// Like [`Self::for_each_entry`], with a predicate checked before the
    /// object is deserialized. Rejected rows cost no decode work.
    pub fn for_each_entry_filtered(
        &mut self,
        collection: &str,
        mut filter: impl FnMut(&str) -> bool,
        mut f: impl FnMut(&str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_entries(collection, Some(&mut filter), &mut f)
    }

    /// Visit `(collection, key, object, metadata)` for every entity,
    /// collection-major.
    pub fn for_each_entry_in_all_collections(
        &mut self,
        mut f: impl FnMut(&str, &str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_entries_all(None, &mut f)
    }

    /// Like [`Self::for_each_entry_in_all_collections`], with a predicate
    /// checked before deserialization.
    pub fn for_each_entry_in_all_collections_filtered(
        &mut self,
        mut filter: impl FnMut(&str, &str) -> bool,
        mut f: impl FnMut(&str, &str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.enumerate_entries_all(Some(&mut filter), &mut f)
    }

    // ========================================================================
    // Enumeration: unordered key lists (cache-resident entries first)
    // ========================================================================

    /// Visit the objects for an unordered list of keys.
    ///
    /// `f` receives the index into `keys` and the object, or `None` when the
    /// key is missing.
    pub fn for_each_object_for_keys(
        &mut self,
        collection: &str,
        keys: &[&str],
        mut f: impl FnMut(usize, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let ck = CollectionKey::new(collection, *key);
            let hit = self.shared.state.lock().object_cache.get(&ck).cloned();
            match hit {
                Some(value) => {
                    if f(index, Some(value)).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push((index, *key)),
            }
        }
        for (index, key) in misses {
            let value = match self.backend.get_data(collection, key)? {
                Some(bytes) => {
                    let value = self.codec.decode(&bytes)?;
                    self.shared
                        .state
                        .lock()
                        .object_cache
                        .put(CollectionKey::new(collection, key), value.clone());
                    Some(value)
                }
                None => None,
            };
            if f(index, value).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Visit the metadata for an unordered list of keys.
    pub fn for_each_metadata_for_keys(
        &mut self,
        collection: &str,
        keys: &[&str],
        mut f: impl FnMut(usize, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let ck = CollectionKey::new(collection, *key);
            let hit = self.shared.state.lock().metadata_cache.get(&ck).cloned();
            match hit {
                Some(metadata) => {
                    if f(index, metadata).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push((index, *key)),
            }
        }
        for (index, key) in misses {
            let metadata = match self.backend.get_metadata(collection, key)? {
                Some(stored) => {
                    let metadata = stored.map(|bytes| self.codec.decode(&bytes)).transpose()?;
                    self.shared
                        .state
                        .lock()
                        .metadata_cache
                        .put(CollectionKey::new(collection, key), metadata.clone());
                    metadata
                }
                None => None,
            };
            if f(index, metadata).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Visit object and metadata for an unordered list of keys.
    ///
    /// `f` receives `None` for keys missing from the database.
    pub fn for_each_entry_for_keys(
        &mut self,
        collection: &str,
        keys: &[&str],
        mut f: impl FnMut(usize, Option<(Value, Option<Value>)>) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let ck = CollectionKey::new(collection, *key);
            let cached = {
                let mut state = self.shared.state.lock();
                match (
                    state.object_cache.get(&ck).cloned(),
                    state.metadata_cache.get(&ck).cloned(),
                ) {
                    (Some(value), Some(metadata)) => Some((value, metadata)),
                    _ => None,
                }
            };
            match cached {
                Some(entry) => {
                    if f(index, Some(entry)).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push((index, *key)),
            }
        }
        for (index, key) in misses {
            let entry = match self.backend.get_row(collection, key)? {
                Some((data, meta_bytes)) => {
                    let value = self.codec.decode(&data)?;
                    let metadata = meta_bytes
                        .map(|bytes| self.codec.decode(&bytes))
                        .transpose()?;
                    let ck = CollectionKey::new(collection, key);
                    let mut state = self.shared.state.lock();
                    state.object_cache.put(ck.clone(), value.clone());
                    state.metadata_cache.put(ck, metadata.clone());
                    Some((value, metadata))
                }
                None => None,
            };
            if f(index, entry).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Enumeration internals: one cursor walk, optional pre-decode predicate
    // ========================================================================

    fn enumerate_metadata(
        &mut self,
        collection: &str,
        mut filter: Option<&mut dyn FnMut(&str) -> bool>,
        f: &mut dyn FnMut(&str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let shared = self.shared;
        let codec = &self.codec;
        self.backend.for_each_key_and_metadata(collection, |key, meta_bytes| {
            if let Some(filter) = filter.as_mut() {
                if !filter(key) {
                    return Ok(ControlFlow::Continue(()));
                }
            }
            let ck = CollectionKey::new(collection, key);
            let cached = shared.state.lock().metadata_cache.get(&ck).cloned();
            let metadata = match cached {
                Some(metadata) => metadata,
                None => {
                    let metadata = meta_bytes.map(|bytes| codec.decode(bytes)).transpose()?;
                    shared.state.lock().metadata_cache.put(ck, metadata.clone());
                    metadata
                }
            };
            Ok(f(key, metadata))
        })
    }

    fn enumerate_metadata_all(
        &mut self,
        mut filter: Option<&mut dyn FnMut(&str, &str) -> bool>,
        f: &mut dyn FnMut(&str, &str, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let shared = self.shared;
        let codec = &self.codec;
        self.backend
            .for_each_key_and_metadata_all(|collection, key, meta_bytes| {
                if let Some(filter) = filter.as_mut() {
                    if !filter(collection, key) {
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                let ck = CollectionKey::new(collection, key);
                let cached = shared.state.lock().metadata_cache.get(&ck).cloned();
                let metadata = match cached {
                    Some(metadata) => metadata,
                    None => {
                        let metadata = meta_bytes.map(|bytes| codec.decode(bytes)).transpose()?;
                        shared.state.lock().metadata_cache.put(ck, metadata.clone());
                        metadata
                    }
                };
                Ok(f(collection, key, metadata))
            })
    }

    fn enumerate_entries(
        &mut self,
        collection: &str,
        mut filter: Option<&mut dyn FnMut(&str) -> bool>,
        f: &mut dyn FnMut(&str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let shared = self.shared;
        let codec = &self.codec;
        self.backend.for_each_row(collection, |key, data, meta_bytes| {
            if let Some(filter) = filter.as_mut() {
                if !filter(key) {
                    return Ok(ControlFlow::Continue(()));
                }
            }
            let ck = CollectionKey::new(collection, key);
            let (cached_value, cached_metadata) = {
                let mut state = shared.state.lock();
                (
                    state.object_cache.get(&ck).cloned(),
                    state.metadata_cache.get(&ck).cloned(),
                )
            };
            let value = match cached_value {
                Some(value) => value,
                None => {
                    let value = codec.decode(data)?;
                    shared
                        .state
                        .lock()
                        .object_cache
                        .put(ck.clone(), value.clone());
                    value
                }
            };
            let metadata = match cached_metadata {
                Some(metadata) => metadata,
                None => {
                    let metadata = meta_bytes.map(|bytes| codec.decode(bytes)).transpose()?;
                    shared.state.lock().metadata_cache.put(ck, metadata.clone());
                    metadata
                }
            };
            Ok(f(key, value, metadata))
        })
    }

    fn enumerate_entries_all(
        &mut self,
        mut filter: Option<&mut dyn FnMut(&str, &str) -> bool>,
        f: &mut dyn FnMut(&str, &str, Value, Option<Value>) -> ControlFlow<()>,
    ) -> Result<()> {
        let shared = self.shared;
        let codec = &self.codec;
        self.backend
            .for_each_row_all(|collection, key, data, meta_bytes| {
                if let Some(filter) = filter.as_mut() {
                    if !filter(collection, key) {
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                let ck = CollectionKey::new(collection, key);
                let (cached_value, cached_metadata) = {
                    let mut state = shared.state.lock();
                    (
                        state.object_cache.get(&ck).cloned(),
                        state.metadata_cache.get(&ck).cloned(),
                    )
                };
                let value = match cached_value {
                    Some(value) => value,
                    None => {
                        let value = codec.decode(data)?;
                        shared
                            .state
                            .lock()
                            .object_cache
                            .put(ck.clone(), value.clone());
                        value
                    }
                };
                let metadata = match cached_metadata {
                    Some(metadata) => metadata,
                    None => {
                        let metadata = meta_bytes.map(|bytes| codec.decode(bytes)).transpose()?;
                        shared.state.lock().metadata_cache.put(ck, metadata.clone());
                        metadata
                    }
                };
                Ok(f(collection, key, value, metadata))
            })
    }
}

/// A read-write transaction: the read surface plus mutations and the change
/// set they accumulate.
pub struct WriteTransaction<'a> {
    read: ReadTransaction<'a>,
    changes: ChangeSet,
    rolled_back: bool,
}

impl<'a> Deref for WriteTransaction<'a> {
    type Target = ReadTransaction<'a>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl<'a> DerefMut for WriteTransaction<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.read
    }
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(read: ReadTransaction<'a>) -> Self {
        WriteTransaction {
            read,
            changes: ChangeSet::new(),
            rolled_back: false,
        }
    }

    pub(crate) fn into_parts(self) -> (ChangeSet, bool) {
        (self.changes, self.rolled_back)
    }

    /// The mutations accumulated so far.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Abort the transaction. Everything staged so far is discarded when the
    /// closure returns; the snapshot counter does not move.
    pub fn rollback(&mut self) {
        self.rolled_back = true;
    }

    /// Upsert the object (and metadata) for `(collection, key)`.
    ///
    /// A `None` object is defined to be equivalent to removal.
    pub fn set_object(
        &mut self,
        collection: &str,
        key: &str,
        object: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let Some(object) = object else {
            return self.remove_object(collection, key);
        };
        let data = self.read.codec.encode(&object)?;
        let meta_bytes = metadata
            .as_ref()
            .map(|m| self.read.codec.encode(m))
            .transpose()?;
        self.read
            .backend
            .set_row(collection, key, &data, meta_bytes.as_deref())?;

        let ck = CollectionKey::new(collection, key);
        {
            let mut state = self.read.shared.state.lock();
            state.object_cache.put(ck.clone(), object);
            state.metadata_cache.put(ck.clone(), metadata);
        }
        self.changes.record_update(ck);
        Ok(())
    }

    /// Upsert raw bytes for `(collection, key)`, bypassing the codec.
    ///
    /// `None` data is equivalent to removal. The object cache entry is
    /// invalidated rather than populated, since the bytes may not be
    /// decodable by the configured codec.
    pub fn set_primitive_data(
        &mut self,
        collection: &str,
        key: &str,
        data: Option<&[u8]>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let Some(data) = data else {
            return self.remove_object(collection, key);
        };
        let meta_bytes = metadata
            .as_ref()
            .map(|m| self.read.codec.encode(m))
            .transpose()?;
        self.read
            .backend
            .set_row(collection, key, data, meta_bytes.as_deref())?;

        let ck = CollectionKey::new(collection, key);
        {
            let mut state = self.read.shared.state.lock();
            state.object_cache.invalidate(&ck);
            state.metadata_cache.put(ck.clone(), metadata);
        }
        self.changes.record_update(ck);
        Ok(())
    }

    /// Update only the metadata for an existing `(collection, key)`.
    ///
    /// Does nothing when the entity is missing. `None` clears stored
    /// metadata while leaving the object untouched.
    pub fn set_metadata(
        &mut self,
        collection: &str,
        key: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let meta_bytes = metadata
            .as_ref()
            .map(|m| self.read.codec.encode(m))
            .transpose()?;
        let touched = self
            .read
            .backend
            .set_metadata(collection, key, meta_bytes.as_deref())?;
        if touched == 0 {
            return Ok(());
        }

        let ck = CollectionKey::new(collection, key);
        self.read
            .shared
            .state
            .lock()
            .metadata_cache
            .put(ck.clone(), metadata);
        self.changes.record_update(ck);
        Ok(())
    }

    /// Remove `(collection, key)`. Removing a missing entity is a no-op.
    pub fn remove_object(&mut self, collection: &str, key: &str) -> Result<()> {
        let removed = self.read.backend.remove_row(collection, key)?;
        let ck = CollectionKey::new(collection, key);
        {
            let mut state = self.read.shared.state.lock();
            state.object_cache.invalidate(&ck);
            state.metadata_cache.invalidate(&ck);
        }
        if removed > 0 {
            self.changes.record_remove(ck);
        }
        Ok(())
    }

    /// Remove several keys from one collection.
    pub fn remove_objects(&mut self, collection: &str, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove_object(collection, key)?;
        }
        Ok(())
    }

    /// Remove every entity in a collection. No trace of the collection
    /// remains afterwards.
    pub fn remove_all_in_collection(&mut self, collection: &str) -> Result<()> {
        self.read.backend.remove_collection(collection)?;
        {
            let mut state = self.read.shared.state.lock();
            state.object_cache.invalidate_collection(collection);
            state.metadata_cache.invalidate_collection(collection);
        }
        self.changes.record_clear_collection(collection);
        Ok(())
    }

    /// Remove every entity in every collection.
    pub fn remove_all(&mut self) -> Result<()> {
        self.read.backend.remove_all()?;
        {
            let mut state = self.read.shared.state.lock();
            state.object_cache.invalidate_all();
            state.metadata_cache.invalidate_all();
        }
        self.changes.record_clear_all();
        Ok(())
    }
}
