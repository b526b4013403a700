//! Test fixtures and database helpers.
//!
//! [`TestPool`] opens a pool either over crash-simulating memory backends or
//! over a temporary directory, and can bring it back up after a clean
//! shutdown or after a simulated kill.

use crate::crash::{CrashControl, CrashableBackend};
use arbor_core::{Broker, BrokerPool, Config, CoreResult, Document, LockMode, Subject};
use std::path::Path;
use tempfile::TempDir;

/// A small document matched by [`INDEX_CONFIG`].
pub const BOOK: &str = r#"<book xmlns="urn:arbor:test">
  <title>Collected Stories</title>
  <author>Ann Example</author>
  <price>12.50</price>
  <chapter n="1"><title>Beginnings</title><para>It started in the rain.</para></chapter>
  <chapter n="2"><title>Endings</title><para>It stopped in the rain.</para></chapter>
</book>"#;

/// A second document with numeric values for range indexes.
pub const SHOP: &str = r#"<shop>
  <item id="1"><name>Pencil</name><price>0.80</price><stock>120</stock></item>
  <item id="2"><name>Eraser</name><price>0.50</price><stock>n/a</stock></item>
  <item id="3"><name>Ruler</name><price>1.20</price><stock>40</stock></item>
</shop>"#;

/// An index configuration exercising every section.
pub const INDEX_CONFIG: &str = r#"<index xmlns:b="urn:arbor:test" index-depth="3">
  <fulltext default="none" attributes="false">
    <include path="//b:title"/>
    <include path="//b:para"/>
  </fulltext>
  <create path="//price" type="xs:double"/>
  <create qname="stock" type="xs:integer"/>
</index>"#;

enum Storage {
    Memory {
        journal: CrashControl,
        snapshot: CrashControl,
    },
    File(TempDir),
}

/// A test database with automatic cleanup.
pub struct TestPool {
    /// The running pool.
    pub pool: BrokerPool,
    config: Config,
    storage: Storage,
}

impl TestPool {
    /// A pool over crash-simulating memory backends.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Like [`TestPool::memory`] with a caller-supplied configuration.
    pub fn memory_with(config: Config) -> Self {
        let (journal, journal_control) = CrashableBackend::new();
        let (snapshot, snapshot_control) = CrashableBackend::new();
        let pool = BrokerPool::open_with_backends(config.clone(), Box::new(journal), Box::new(snapshot))
            .expect("Failed to open in-memory pool");
        Self {
            pool,
            config,
            storage: Storage::Memory {
                journal: journal_control,
                snapshot: snapshot_control,
            },
        }
    }

    /// A pool over a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(test_config())
    }

    /// Like [`TestPool::file`] with a caller-supplied configuration.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let pool = BrokerPool::open(temp_dir.path(), config.clone()).expect("Failed to open file pool");
        Self {
            pool,
            config,
            storage: Storage::File(temp_dir),
        }
    }

    /// The database directory, `None` for memory pools.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File(dir) => Some(dir.path()),
            Storage::Memory { .. } => None,
        }
    }

    /// Failure switches of the journal backend, `None` for file pools.
    pub fn journal_control(&self) -> Option<&CrashControl> {
        match &self.storage {
            Storage::Memory { journal, .. } => Some(journal),
            Storage::File(_) => None,
        }
    }

    /// Checks out a broker for the system subject.
    pub fn admin(&self) -> Broker {
        self.checkout(Subject::system())
    }

    /// Checks out a broker for `subject`.
    pub fn checkout(&self, subject: Subject) -> Broker {
        self.pool.checkout(subject).expect("Failed to check out broker")
    }

    /// Shuts down cleanly and opens the same database again.
    pub fn restart(&mut self) {
        self.pool.shutdown(false).expect("Clean shutdown failed");
        self.reopen(false);
    }

    /// Kills the pool without flushing or checkpointing and opens it again.
    ///
    /// Memory pools keep only the bytes that were synced, so unforced
    /// commits are lost the way they would be on power failure.
    pub fn crash_and_restart(&mut self) {
        self.pool.set_force_corruption(true);
        let _ = self.pool.shutdown(true);
        self.reopen(true);
    }

    fn reopen(&mut self, crashed: bool) {
        let pool = match &mut self.storage {
            Storage::Memory { journal, snapshot } => {
                let image = |control: &CrashControl| {
                    if crashed {
                        control.durable_image()
                    } else {
                        control.full_image()
                    }
                };
                let (journal_backend, journal_control) = CrashableBackend::with_data(image(&*journal));
                let (snapshot_backend, snapshot_control) = CrashableBackend::with_data(image(&*snapshot));
                *journal = journal_control;
                *snapshot = snapshot_control;
                BrokerPool::open_with_backends(
                    self.config.clone(),
                    Box::new(journal_backend),
                    Box::new(snapshot_backend),
                )
            }
            Storage::File(dir) => BrokerPool::open(dir.path(), self.config.clone().create_if_missing(false)),
        };
        self.pool = pool.expect("Failed to reopen pool");
    }
}

impl std::ops::Deref for TestPool {
    type Target = BrokerPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        let _ = self.pool.shutdown(true);
    }
}

/// Configuration with short timeouts so failing tests fail fast.
pub fn test_config() -> Config {
    Config::new()
        .brokers(1, 4)
        .checkout_timeout(std::time::Duration::from_secs(5))
        .lock_timeout(std::time::Duration::from_secs(5))
        .shutdown_timeout(std::time::Duration::from_secs(5))
}

/// Runs a test against a temporary memory pool.
pub fn with_test_pool<F, R>(f: F) -> R
where
    F: FnOnce(&BrokerPool) -> R,
{
    let db = TestPool::memory();
    f(&db.pool)
}

/// Stores `xml` as `name` in `collection` (created if needed) in its own
/// committed transaction.
pub fn try_store(broker: &Broker, collection: &str, name: &str, xml: &str) -> CoreResult<Document> {
    let mut txn = broker.begin()?;
    let coll = broker.get_or_create_collection(&mut txn, collection)?;
    let info = broker.validate_document(&txn, &coll, name, xml)?;
    let document = broker.store_document(&mut txn, &coll, info, xml)?;
    coll.release()?;
    broker.commit(&mut txn)?;
    Ok(document)
}

/// [`try_store`] that panics on failure.
pub fn store(broker: &Broker, collection: &str, name: &str, xml: &str) -> Document {
    try_store(broker, collection, name, xml).expect("Failed to store document")
}

/// Creates `path` and its ancestors in a committed transaction.
pub fn create_collection(broker: &Broker, path: &str) {
    let mut txn = broker.begin().expect("Failed to begin");
    let coll = broker
        .get_or_create_collection(&mut txn, path)
        .expect("Failed to create collection");
    coll.release().expect("Failed to release collection");
    broker.commit(&mut txn).expect("Failed to commit");
}

/// Content of the document at `path`, `None` if it does not exist.
pub fn read_document(broker: &Broker, path: &str) -> Option<String> {
    let handle = broker
        .open_document(path, LockMode::Read)
        .expect("Failed to open document")?;
    let content = handle.document().expect("Failed to read document").content;
    handle.release().expect("Failed to release document");
    Some(content)
}

/// Sets the index configuration of `path` in a committed transaction.
pub fn configure_index(broker: &Broker, path: &str, config: &str) {
    let mut txn = broker.begin().expect("Failed to begin");
    let mut coll = broker
        .get_or_create_collection(&mut txn, path)
        .expect("Failed to open collection");
    coll.set_index_config(Some(config))
        .expect("Invalid index configuration");
    broker
        .save_collection(&mut txn, &mut coll)
        .expect("Failed to save collection");
    coll.release().expect("Failed to release collection");
    broker.commit(&mut txn).expect("Failed to commit");
}
