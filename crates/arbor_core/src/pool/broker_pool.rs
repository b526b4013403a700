//! The broker pool: startup, checkout, checkin and shutdown.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::journal::{recover, Journal, LogEntry, RecoveryReport};
use crate::lock::{HolderId, LockManager};
use crate::pool::broker::Broker;
use crate::transaction::TransactionManager;
use crate::tree::{
    CollectionMeta, Permission, SnapshotStore, Subject, TreeStore, DBA_GROUP, ROOT_COLLECTION,
    SYSTEM_USER,
};
use crate::types::{now_millis, InstanceId, SequenceNumber};
use arbor_storage::{FileBackend, StorageBackend};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A pool of brokers over one database instance.
///
/// Cloning is cheap; every clone refers to the same instance. Brokers keep
/// the instance alive while checked out.
///
/// # Example
///
/// ```rust,ignore
/// use arbor_core::{BrokerPool, Config, Subject, LockMode};
///
/// let pool = BrokerPool::open(Path::new("my_db"), Config::default())?;
/// let broker = pool.checkout(Subject::system())?;
/// let mut txn = broker.begin()?;
/// let coll = broker.get_or_create_collection(&mut txn, "/db/books")?;
/// coll.release()?;
/// broker.commit(&mut txn)?;
/// pool.checkin(Some(broker));
/// pool.shutdown(false)?;
/// ```
#[derive(Clone)]
pub struct BrokerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    instance_id: InstanceId,
    config: Config,
    dir: Mutex<Option<DatabaseDir>>,
    locks: LockManager,
    transactions: Arc<TransactionManager>,
    recovery: RecoveryReport,
    slots: Mutex<PoolSlots>,
    returned: Condvar,
    total_checkouts: AtomicU64,
    leaked_locks: AtomicU64,
    force_corruption: AtomicBool,
    shut_down: AtomicBool,
}

/// Broker bookkeeping guarded by one mutex.
#[derive(Debug, Default)]
struct PoolSlots {
    /// Ids of brokers that were returned and may be handed out again.
    idle: Vec<u64>,
    created: usize,
    active: usize,
    next_id: u64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Upper bound on brokers checked out at once.
    pub max: usize,
    /// Brokers created so far.
    pub created: usize,
    /// Brokers currently checked out.
    pub active: usize,
    /// Created brokers waiting in the pool.
    pub idle: usize,
    /// Successful checkouts since startup.
    pub total_checkouts: u64,
    /// Locks found still held when their broker came back.
    pub leaked_locks: u64,
    /// Transactions begun and not yet finished.
    pub active_transactions: usize,
}

impl BrokerPool {
    // === Startup ===

    /// Opens the database in directory `path`, creating it if the
    /// configuration allows.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for bad broker bounds, `DatabaseLocked` if
    /// another process holds the directory, `InvalidFormat` if it is missing,
    /// or any snapshot, journal or recovery error.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if dir.is_new_database() {
            info!(path = %path.display(), "creating new database");
        }
        let journal = FileBackend::open(&dir.journal_path())?;
        let snapshots = SnapshotStore::file(dir.snapshot_path());
        Self::assemble(config, Box::new(journal), snapshots, Some(dir))
    }

    /// Opens a database over caller-supplied backends for the journal and
    /// the tree snapshot.
    ///
    /// # Errors
    ///
    /// As for [`BrokerPool::open`], minus the directory errors.
    pub fn open_with_backends(
        config: Config,
        journal: Box<dyn StorageBackend>,
        snapshot: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Self::assemble(config, journal, SnapshotStore::backend(snapshot), None)
    }

    /// Opens a fresh database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Only fails on an internal error during bootstrap.
    pub fn open_in_memory() -> CoreResult<Self> {
        use arbor_storage::InMemoryBackend;
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    fn assemble(
        config: Config,
        journal: Box<dyn StorageBackend>,
        snapshots: SnapshotStore,
        dir: Option<DatabaseDir>,
    ) -> CoreResult<Self> {
        let tree = match snapshots.load()? {
            Some(image) => TreeStore::restore(image, config.default_index_depth)?,
            None => TreeStore::new(config.default_index_depth),
        };
        let tree = Arc::new(tree);
        let journal = Arc::new(Journal::new(journal));
        let recovery = recover(&journal, &tree)?;
        let transactions = Arc::new(TransactionManager::new(
            journal,
            tree,
            snapshots,
            &config,
            &recovery,
        ));
        bootstrap_root(&transactions)?;

        let slots = PoolSlots {
            idle: (1..=config.min_brokers as u64).rev().collect(),
            created: config.min_brokers,
            active: 0,
            next_id: config.min_brokers as u64 + 1,
        };
        let pool = Self {
            inner: Arc::new(PoolInner {
                name: config.instance_name.clone(),
                instance_id: InstanceId::generate(),
                locks: LockManager::new(config.lock_timeout),
                force_corruption: AtomicBool::new(config.force_corruption),
                config,
                dir: Mutex::new(dir),
                transactions,
                recovery,
                slots: Mutex::new(slots),
                returned: Condvar::new(),
                total_checkouts: AtomicU64::new(0),
                leaked_locks: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        };
        info!(
            instance = %pool.inner.name,
            id = %pool.inner.instance_id,
            min = pool.inner.config.min_brokers,
            max = pool.inner.config.max_brokers,
            "broker pool started"
        );
        Ok(pool)
    }

    // === Checkout ===

    /// Takes a broker acting as `subject`, waiting up to the configured
    /// checkout timeout for one to become free.
    ///
    /// Must not be called while holding a lock: a caller blocked here while
    /// others wait on its locks can deadlock the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` on timeout and `DatabaseClosed` once the pool
    /// is shutting down.
    pub fn checkout(&self, subject: Subject) -> CoreResult<Broker> {
        let started = Instant::now();
        let deadline = started + self.inner.config.checkout_timeout;
        let mut slots = self.inner.slots.lock();
        let id = loop {
            if self.is_shut_down() {
                return Err(CoreError::DatabaseClosed);
            }
            if let Some(id) = slots.idle.pop() {
                break id;
            }
            if slots.created < self.inner.config.max_brokers {
                let id = slots.next_id;
                slots.next_id += 1;
                slots.created += 1;
                debug!(broker = id, created = slots.created, "broker created");
                break id;
            }
            if self
                .inner
                .returned
                .wait_until(&mut slots, deadline)
                .timed_out()
            {
                // A broker may have come back right at the deadline.
                if let Some(id) = slots.idle.pop() {
                    break id;
                }
                return Err(CoreError::PoolExhausted {
                    waited: started.elapsed(),
                    max: self.inner.config.max_brokers,
                });
            }
        };
        slots.active += 1;
        drop(slots);

        self.inner.total_checkouts.fetch_add(1, Ordering::Relaxed);
        debug!(broker = id, subject = subject.name(), "broker checked out");
        Ok(Broker::new(self.clone(), HolderId(id), subject))
    }

    /// Returns a broker to the pool. `None` is accepted and ignored.
    ///
    /// Dropping a broker has the same effect.
    pub fn checkin(&self, broker: Option<Broker>) {
        drop(broker);
    }

    /// Puts `broker`'s slot back. Locks still on its ledger are a caller
    /// bug: they are logged, counted and force-released so later checkouts
    /// don't contend with a holder that no longer exists.
    pub(crate) fn return_broker(&self, broker: &Broker) {
        let leaked = broker.take_ledger();
        if !leaked.is_empty() {
            error!(
                broker = %broker.id(),
                count = leaked.len(),
                resources = ?leaked.iter().map(|(r, m)| format!("{m} {r}")).collect::<Vec<_>>(),
                "broker returned with unreleased locks"
            );
            for (resource, mode) in leaked.iter().rev() {
                if let Err(e) = self.inner.locks.release(resource, *mode, broker.id()) {
                    warn!(%resource, error = %e, "could not force-release leaked lock");
                }
            }
            self.inner
                .leaked_locks
                .fetch_add(leaked.len() as u64, Ordering::Relaxed);
        }

        let mut slots = self.inner.slots.lock();
        slots.idle.push(broker.id().0);
        slots.active = slots.active.saturating_sub(1);
        drop(slots);
        self.inner.returned.notify_all();
        debug!(broker = %broker.id(), "broker checked in");
    }

    // === Shutdown ===

    /// Shuts the pool down. Calling it again is a no-op.
    ///
    /// Without `force`, waits up to the shutdown timeout for checked-out
    /// brokers to come back; stragglers are then interrupted as with
    /// `force`. Interrupted transactions fail at their next operation and
    /// are rolled back by recovery. The journal is then forced and a final
    /// checkpoint written, unless the forced-corruption switch is set.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush or checkpoint. The pool is shut
    /// down regardless.
    pub fn shutdown(&self, force: bool) -> CoreResult<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(instance = %self.inner.name, force, "shutting down broker pool");
        self.inner.returned.notify_all();

        let drained = force || self.wait_for_brokers();
        if !drained {
            warn!(
                active = self.inner.slots.lock().active,
                "brokers still checked out after shutdown timeout, interrupting"
            );
        }
        if !drained || force {
            self.inner.transactions.interrupt();
        }
        self.inner.transactions.close();

        let result = if self.force_corruption() {
            warn!("forced corruption: skipping final journal flush and checkpoint");
            Ok(())
        } else {
            self.inner
                .transactions
                .flush_to_log(true)
                .and_then(|()| self.inner.transactions.checkpoint().map(|_| ()))
        };

        self.inner.dir.lock().take();
        info!(instance = %self.inner.name, "broker pool stopped");
        result
    }

    /// Waits for every broker to come back; false on timeout.
    fn wait_for_brokers(&self) -> bool {
        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        let mut slots = self.inner.slots.lock();
        while slots.active > 0 {
            if self
                .inner
                .returned
                .wait_until(&mut slots, deadline)
                .timed_out()
            {
                return slots.active == 0;
            }
        }
        true
    }

    /// Sets the forced-corruption test switch. While set, shutdown skips
    /// the final flush and checkpoint so the next startup has to recover.
    pub fn set_force_corruption(&self, value: bool) {
        self.inner.force_corruption.store(value, Ordering::SeqCst);
    }

    /// Current state of the forced-corruption switch.
    #[must_use]
    pub fn force_corruption(&self) -> bool {
        self.inner.force_corruption.load(Ordering::SeqCst)
    }

    /// Whether [`BrokerPool::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    // === Maintenance ===

    /// Writes a checkpoint now.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after shutdown, or the snapshot or journal
    /// error.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        if self.is_shut_down() {
            return Err(CoreError::DatabaseClosed);
        }
        self.inner.transactions.checkpoint()
    }

    /// Flushes the journal; with `force`, onto stable storage.
    ///
    /// # Errors
    ///
    /// Returns `TransactionLog` if the flush fails.
    pub fn flush_to_log(&self, force: bool) -> CoreResult<()> {
        self.inner.transactions.flush_to_log(force)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots.lock();
        PoolStats {
            max: self.inner.config.max_brokers,
            created: slots.created,
            active: slots.active,
            idle: slots.idle.len(),
            total_checkouts: self.inner.total_checkouts.load(Ordering::Relaxed),
            leaked_locks: self.inner.leaked_locks.load(Ordering::Relaxed),
            active_transactions: self.inner.transactions.active_count(),
        }
    }

    /// What recovery found at startup.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity of this running instance; differs on every startup.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance_id
    }

    /// The transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.inner.transactions
    }

    /// The tree of collections and documents.
    #[must_use]
    pub fn tree(&self) -> &Arc<TreeStore> {
        self.inner.transactions.tree()
    }

    /// The lock manager shared by this pool's brokers.
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn transactions(&self) -> &Arc<TransactionManager> {
        &self.inner.transactions
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Whether two handles refer to the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for BrokerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPool")
            .field("name", &self.inner.name)
            .field("instance_id", &self.inner.instance_id)
            .field("stats", &self.stats())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::SeqCst) && !self.force_corruption.load(Ordering::SeqCst) {
            if let Err(e) = self.transactions.flush_to_log(true) {
                warn!(instance = %self.name, error = %e, "flush on drop failed");
            }
        }
    }
}

/// Creates the root collection in its own committed transaction if it is
/// missing.
fn bootstrap_root(transactions: &Arc<TransactionManager>) -> CoreResult<()> {
    if transactions.tree().contains(ROOT_COLLECTION) {
        return Ok(());
    }
    let mut txn = transactions.begin()?;
    transactions.apply(
        &mut txn,
        LogEntry::Collection {
            path: ROOT_COLLECTION.to_string(),
            before: None,
            after: Some(CollectionMeta {
                path: ROOT_COLLECTION.to_string(),
                created: now_millis(),
                permission: Permission::new(SYSTEM_USER, DBA_GROUP, 0o755),
                index_config: None,
            }),
        },
    )?;
    transactions.commit(&mut txn)?;
    info!(collection = ROOT_COLLECTION, "root collection created");
    Ok(())
}
