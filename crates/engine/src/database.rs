//! Shared database handle.
//!
//! The [`Database`] is the process-wide source of truth shared by every
//! connection: the storage path and codec, the snapshot counter, the global
//! write-serialization lock, the registry of live connections, and the
//! observer list. Connections hold an `Arc<Database>`; the registry holds
//! only weak references back, so database teardown is well-defined.
//!
//! ## Locks
//!
//! - `write_lock` serializes write transactions for their whole lifetime.
//!   Writes are applied, and snapshots advance, in the order writers acquire
//!   it.
//! - `sync_lock` is held briefly on two paths: by a committing writer across
//!   (backend commit, counter advance, sibling propagation) and by a read
//!   transaction across (backend begin + snapshot pin, counter read, pending
//!   drain). Pairing the two makes a transaction's counter stamp, its backend
//!   snapshot, and its cache state mutually consistent.

use crate::changeset::ChangeSet;
use crate::connection::{Connection, ConnectionShared};
use cabinet_core::{MsgpackCodec, Result, Snapshot, ValueCodec};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Default per-cache entry limit for new connections.
pub const DEFAULT_CACHE_LIMIT: usize = 250;

/// Handle returned by [`Database::add_observer`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

struct Observer {
    id: ObserverId,
    callback: ObserverFn,
}

/// Per-connection cache configuration, fixed at connection creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheOptions {
    pub object_limit: usize,
    pub metadata_limit: usize,
}

/// The shared database: storage location, snapshot counter, write lock,
/// connection registry, observers.
pub struct Database {
    path: PathBuf,
    codec: Arc<dyn ValueCodec>,
    cache_options: CacheOptions,
    snapshot: AtomicU64,
    write_lock: Mutex<()>,
    sync_lock: Mutex<()>,
    connections: Mutex<Vec<Weak<ConnectionShared>>>,
    observers: Mutex<Vec<Observer>>,
    next_observer_id: AtomicU64,
}

impl Database {
    /// Open a database at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::builder().path(path).open()
    }

    /// Create a builder for database configuration.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open a new connection to this database.
    ///
    /// The connection gets its own backend handle to the shared file and its
    /// own cache pair, and is registered for change propagation.
    pub fn new_connection(self: &Arc<Self>) -> Result<Connection> {
        let connection = Connection::open(Arc::clone(self))?;
        self.connections
            .lock()
            .push(Arc::downgrade(connection.shared()));
        Ok(connection)
    }

    /// Current snapshot: how many write transactions have committed.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.load(Ordering::SeqCst)
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connections still registered (diagnostic).
    pub fn connection_count(&self) -> usize {
        let mut registry = self.connections.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.len()
    }

    /// Register an observer invoked once per committed write, after sibling
    /// caches have been synchronized, with that commit's change set.
    pub fn add_observer(&self, f: impl Fn(&ChangeSet) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::SeqCst));
        self.observers.lock().push(Observer {
            id,
            callback: Arc::new(f),
        });
        id
    }

    /// Unregister an observer. Returns whether it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    // ========================================================================
    // Engine internals
    // ========================================================================

    pub(crate) fn codec(&self) -> Arc<dyn ValueCodec> {
        Arc::clone(&self.codec)
    }

    pub(crate) fn cache_options(&self) -> CacheOptions {
        self.cache_options
    }

    /// Acquire the global write-serialization lock. Blocks until the current
    /// writer (if any) finishes.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Acquire the snapshot pairing lock (see module docs).
    pub(crate) fn lock_sync(&self) -> MutexGuard<'_, ()> {
        self.sync_lock.lock()
    }

    /// Advance the snapshot counter. Only called by the committing writer
    /// while it holds both the write lock and the sync lock.
    pub(crate) fn advance_snapshot(&self) -> Snapshot {
        self.snapshot.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Synchronize every live connection except the committing one with a
    /// just-committed change set, pruning dead registry entries on the way.
    ///
    /// Cannot fail: a connection that is gone is simply dropped from the
    /// registry.
    pub(crate) fn propagate(
        &self,
        changes: &Arc<ChangeSet>,
        snapshot: Snapshot,
        source: &Arc<ConnectionShared>,
    ) {
        let mut registry = self.connections.lock();
        let before = registry.len();
        registry.retain(|weak| match weak.upgrade() {
            Some(shared) => {
                if !Arc::ptr_eq(&shared, source) {
                    shared.synchronize(changes, snapshot);
                }
                true
            }
            None => false,
        });
        tracing::trace!(
            snapshot,
            connections = registry.len(),
            pruned = before - registry.len(),
            "change set propagated"
        );
    }

    /// Deliver a committed change set to every registered observer.
    ///
    /// Callbacks run outside the observer lock so an observer may register
    /// or unregister observers itself.
    pub(crate) fn notify_observers(&self, changes: &ChangeSet) {
        let callbacks: Vec<ObserverFn> = self
            .observers
            .lock()
            .iter()
            .map(|o| Arc::clone(&o.callback))
            .collect();
        for callback in callbacks {
            callback(changes);
        }
    }
}

/// Builder for database configuration.
///
/// ```ignore
/// let db = Database::builder()
///     .path("./store.db")
///     .object_cache_limit(500)
///     .metadata_cache_limit(0) // unlimited
///     .open()?;
/// ```
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    object_cache_limit: usize,
    metadata_cache_limit: usize,
    codec: Arc<dyn ValueCodec>,
}

impl DatabaseBuilder {
    /// New builder with default settings.
    pub fn new() -> Self {
        DatabaseBuilder {
            path: None,
            object_cache_limit: DEFAULT_CACHE_LIMIT,
            metadata_cache_limit: DEFAULT_CACHE_LIMIT,
            codec: Arc::new(MsgpackCodec),
        }
    }

    /// Set the database file path (required).
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_owned());
        self
    }

    /// Object-cache entry limit for each connection. `0` disables eviction.
    pub fn object_cache_limit(mut self, limit: usize) -> Self {
        self.object_cache_limit = limit;
        self
    }

    /// Metadata-cache entry limit for each connection. `0` disables eviction.
    pub fn metadata_cache_limit(mut self, limit: usize) -> Self {
        self.metadata_cache_limit = limit;
        self
    }

    /// Replace the default MessagePack codec.
    pub fn codec(mut self, codec: impl ValueCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Open the database.
    ///
    /// Creates the file and schema on first open by probing with a throwaway
    /// backend handle, so a misconfigured path fails here rather than at the
    /// first connection.
    pub fn open(self) -> Result<Arc<Database>> {
        let path = self.path.ok_or_else(|| {
            cabinet_core::Error::InvalidOperation("database path not configured".into())
        })?;

        cabinet_storage::SqliteBackend::open(&path)?;

        Ok(Arc::new(Database {
            path,
            codec: self.codec,
            cache_options: CacheOptions {
                object_limit: self.object_cache_limit,
                metadata_limit: self.metadata_cache_limit,
            },
            snapshot: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            sync_lock: Mutex::new(()),
            connections: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(0),
        }))
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
