//! Per-client connection handle.
//!
//! A [`Connection`] owns its backend handle to the shared database file plus
//! an object cache and a metadata cache. Transactions on one connection are
//! strictly sequential; `read` and `read_write` take `&mut self`, so nesting
//! or interleaving transactions on one connection is rejected at compile
//! time.
//!
//! The cache pair and the synchronized-snapshot pointer live in
//! [`ConnectionShared`] behind a mutex, because change propagation from a
//! sibling's commit mutates them on the committing thread. A change set that
//! arrives while this connection has a transaction in flight is queued and
//! applied when the transaction ends.

use crate::cache::EntryCache;
use crate::changeset::ChangeSet;
use crate::database::Database;
use crate::transaction::{ReadTransaction, WriteTransaction};
use cabinet_core::{Error, Result, Snapshot, Value};
use cabinet_storage::SqliteBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// A change set waiting for this connection's in-flight transaction to end.
struct PendingSync {
    changes: Arc<ChangeSet>,
    snapshot: Snapshot,
}

/// Cache pair, snapshot pointer, and propagation queue.
pub(crate) struct ConnState {
    pub(crate) object_cache: EntryCache<Value>,
    pub(crate) metadata_cache: EntryCache<Option<Value>>,
    pub(crate) snapshot: Snapshot,
    pending: Vec<PendingSync>,
    in_transaction: bool,
    closed: bool,
}

/// The part of a connection that sibling commits reach through the database
/// registry. Owned by the [`Connection`]; the registry holds a weak ref.
pub(crate) struct ConnectionShared {
    pub(crate) state: Mutex<ConnState>,
}

impl ConnectionShared {
    /// Apply a committed sibling change set, or queue it if a transaction is
    /// in flight. Closed connections ignore everything.
    pub(crate) fn synchronize(&self, changes: &Arc<ChangeSet>, snapshot: Snapshot) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.in_transaction {
            state.pending.push(PendingSync {
                changes: Arc::clone(changes),
                snapshot,
            });
        } else {
            apply_changes(&mut state, changes, snapshot);
        }
    }
}

/// Invalidate every cache entry the change set names and advance the
/// synchronized snapshot.
fn apply_changes(state: &mut ConnState, changes: &ChangeSet, snapshot: Snapshot) {
    if changes.all_cleared() {
        state.object_cache.invalidate_all();
        state.metadata_cache.invalidate_all();
    } else {
        for collection in changes.cleared_collections() {
            state.object_cache.invalidate_collection(collection);
            state.metadata_cache.invalidate_collection(collection);
        }
        for ck in changes.updated().iter().chain(changes.removed()) {
            state.object_cache.invalidate(ck);
            state.metadata_cache.invalidate(ck);
        }
    }
    state.snapshot = snapshot;
}

/// A client handle bound to the shared database.
pub struct Connection {
    db: Arc<Database>,
    backend: SqliteBackend,
    shared: Arc<ConnectionShared>,
    closed: bool,
}

impl Connection {
    pub(crate) fn open(db: Arc<Database>) -> Result<Self> {
        let backend = SqliteBackend::open(db.path())?;
        let options = db.cache_options();
        let shared = Arc::new(ConnectionShared {
            state: Mutex::new(ConnState {
                object_cache: EntryCache::new(options.object_limit),
                metadata_cache: EntryCache::new(options.metadata_limit),
                snapshot: db.snapshot(),
                pending: Vec::new(),
                in_transaction: false,
                closed: false,
            }),
        });
        Ok(Connection {
            db,
            backend,
            shared,
            closed: false,
        })
    }

    pub(crate) fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    /// The database this connection is attached to.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Snapshot this connection has synchronized to.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().snapshot
    }

    /// Close the connection. Later transactions fail with
    /// [`Error::ConnectionClosed`]; propagation stops reaching it.
    pub fn close(&mut self) {
        self.closed = true;
        self.shared.state.lock().closed = true;
    }

    /// Run a read transaction.
    ///
    /// Every read inside the closure is consistent with the snapshot recorded
    /// at begin: effects of writes committed after begin are not observed,
    /// even if such a commit happens while the closure runs.
    pub fn read<R>(&mut self, f: impl FnOnce(&mut ReadTransaction<'_>) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        let db = Arc::clone(&self.db);

        let snapshot = {
            // Pairing lock: backend snapshot pin, counter read, and pending
            // drain must see the same committed state (see database docs).
            let _sync = db.lock_sync();
            self.backend.begin_read()?;
            let snapshot = db.snapshot();
            let mut state = self.shared.state.lock();
            drain_pending(&mut state);
            state.snapshot = snapshot;
            state.in_transaction = true;
            snapshot
        };

        let mut txn = ReadTransaction::new(&self.backend, &self.shared, db.codec(), snapshot);
        let result = f(&mut txn);
        drop(txn);

        let ended = self.backend.commit();
        {
            let mut state = self.shared.state.lock();
            state.in_transaction = false;
            drain_pending(&mut state);
        }
        if let Err(e) = ended {
            let _ = self.backend.rollback();
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    /// Run a read-write transaction.
    ///
    /// Blocks until the global write lock is free; at most one write
    /// transaction is active against the database at any instant. On success
    /// the snapshot counter advances by one and the accumulated change set is
    /// propagated to every other live connection before observers are
    /// notified. On failure (or after [`WriteTransaction::rollback`]) the
    /// backend transaction is rolled back, the counter does not move, and the
    /// connection's own speculative cache entries are discarded.
    pub fn read_write<R>(
        &mut self,
        f: impl FnOnce(&mut WriteTransaction<'_>) -> Result<R>,
    ) -> Result<R> {
        self.ensure_open()?;
        let db = Arc::clone(&self.db);

        let _write = db.lock_writer();
        self.backend.begin_write()?;
        let snapshot = db.snapshot();
        {
            let mut state = self.shared.state.lock();
            debug_assert!(state.pending.is_empty());
            state.in_transaction = true;
        }

        let mut txn = WriteTransaction::new(ReadTransaction::new(
            &self.backend,
            &self.shared,
            db.codec(),
            snapshot,
        ));
        let result = f(&mut txn);
        let (changes, rolled_back) = txn.into_parts();

        match result {
            Ok(value) if !rolled_back => {
                self.commit_write(&db, changes)?;
                Ok(value)
            }
            Ok(value) => {
                self.abort_write(&changes)?;
                tracing::debug!("write transaction rolled back by caller");
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = self.abort_write(&changes) {
                    tracing::warn!(error = %abort_err, "rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Commit protocol: backend commit, counter advance, own snapshot bump,
    /// sibling propagation (all under the pairing lock), then observers.
    fn commit_write(&self, db: &Arc<Database>, changes: ChangeSet) -> Result<()> {
        let changes = Arc::new(changes);
        {
            let _sync = db.lock_sync();
            if let Err(e) = self.backend.commit() {
                drop(_sync);
                tracing::warn!(error = %e, "backend commit failed, rolling back");
                let _ = self.backend.rollback();
                self.discard_speculative(&changes);
                return Err(e);
            }
            let snapshot = db.advance_snapshot();
            {
                let mut state = self.shared.state.lock();
                state.snapshot = snapshot;
                state.in_transaction = false;
            }
            db.propagate(&changes, snapshot, &self.shared);
            tracing::debug!(
                snapshot,
                updated = changes.updated().len(),
                removed = changes.removed().len(),
                cleared = changes.cleared_collections().len(),
                all_cleared = changes.all_cleared(),
                "write transaction committed"
            );
        }
        db.notify_observers(&changes);
        Ok(())
    }

    fn abort_write(&self, changes: &ChangeSet) -> Result<()> {
        let rolled = self.backend.rollback();
        self.discard_speculative(changes);
        rolled
    }

    /// Drop the cache entries this transaction wrote before it failed, so the
    /// caches never outlive the rolled-back backend state.
    fn discard_speculative(&self, changes: &ChangeSet) {
        let mut state = self.shared.state.lock();
        let snapshot = state.snapshot;
        apply_changes(&mut state, changes, snapshot);
        state.in_transaction = false;
        drain_pending(&mut state);
    }
}

fn drain_pending(state: &mut ConnState) {
    let pending = std::mem::take(&mut state.pending);
    for sync in pending {
        apply_changes(state, &sync.changes, sync.snapshot);
    }
}
