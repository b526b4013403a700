//! The collection/document tree guarded by the lock and transaction layers.
//!
//! Collections form a hierarchy under `/db`; each holds documents by file
//! name. Every change arrives as a journal [`LogEntry`](crate::journal::LogEntry)
//! carrying before and after images, so the same entry serves redo, undo and
//! abort.

mod collection;
mod document;
pub mod path;
mod security;
mod snapshot;
mod store;

pub use collection::{Collection, CollectionMeta};
pub use document::{content_digest, Document, XML_MIME_TYPE};
pub use path::ROOT_COLLECTION;
pub use security::{Access, Permission, Subject, DBA_GROUP, GUEST_USER, SYSTEM_USER};
pub use snapshot::{CollectionImage, SnapshotStore, TreeSnapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use store::{CollectionRef, TreeStore};
