//! # Arbor Core
//!
//! Transactional core of the Arbor XML store.
//!
//! This crate provides:
//! - A reentrant READ/WRITE lock manager over collections and documents
//! - The broker pool through which callers reach the database
//! - A write-ahead transaction journal with checkpoints and crash recovery
//! - The index specification compiler used when documents are validated
//!
//! ## Example
//!
//! ```rust
//! use arbor_core::{BrokerPool, LockMode, Subject};
//!
//! let pool = BrokerPool::open_in_memory().unwrap();
//! let broker = pool.checkout(Subject::system()).unwrap();
//!
//! let mut txn = broker.begin().unwrap();
//! let coll = broker.get_or_create_collection(&mut txn, "/db/books").unwrap();
//! let info = broker
//!     .validate_document(&txn, &coll, "a.xml", "<book><title>Arbor</title></book>")
//!     .unwrap();
//! broker
//!     .store_document(&mut txn, &coll, info, "<book><title>Arbor</title></book>")
//!     .unwrap();
//! coll.release().unwrap();
//! broker.commit(&mut txn).unwrap();
//!
//! let doc = broker.open_document("/db/books/a.xml", LockMode::Read).unwrap().unwrap();
//! assert!(doc.document().unwrap().content.contains("Arbor"));
//! doc.release().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
pub mod index;
pub mod journal;
pub mod lock;
pub mod pool;
pub mod transaction;
pub mod tree;
mod types;

pub use config::{Config, DEFAULT_INSTANCE_NAME};
pub use dir::{DatabaseDir, JOURNAL_FILE, LOCK_FILE, SNAPSHOT_FILE};
pub use error::{CoreError, CoreResult};
pub use index::{IndexSpec, IndexSummary};
pub use journal::{Journal, JournalRecord, LogEntry, RecoveryReport};
pub use lock::{HolderId, LockManager, LockMode, ResourceId};
pub use pool::{
    Broker, BrokerPool, CollectionHandle, DocumentHandle, IndexInfo, PoolRegistry, PoolStats,
};
pub use transaction::{Durability, TransactionManager, TransactionState, Txn};
pub use tree::{Access, Document, Permission, Subject, TreeStore};
pub use types::{DocumentId, InstanceId, SequenceNumber, TransactionId};
