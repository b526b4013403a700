//! Locked views of collections and documents.

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexSpec, IndexSummary};
use crate::lock::{LockMode, ResourceId};
use crate::pool::broker::Broker;
use crate::tree::{Collection, CollectionMeta, CollectionRef, Document, Permission};
use crate::types::DocumentId;
use parking_lot::RwLockReadGuard;
use std::sync::Arc;
use tracing::error;

/// A collection opened through a broker, holding its lock.
///
/// The lock is released exactly once: by [`CollectionHandle::release`] or,
/// failing that, when the handle is dropped.
pub struct CollectionHandle<'b> {
    broker: &'b Broker,
    path: String,
    mode: LockMode,
    collection: CollectionRef,
    staged: Option<CollectionMeta>,
    released: bool,
}

impl<'b> CollectionHandle<'b> {
    pub(crate) fn new(broker: &'b Broker, path: String, mode: LockMode, collection: CollectionRef) -> Self {
        Self {
            broker,
            path,
            mode,
            collection,
            staged: None,
            released: false,
        }
    }

    /// Normalized path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mode the collection is locked in.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Read access to the collection's current state.
    pub fn read(&self) -> RwLockReadGuard<'_, Collection> {
        self.collection.read()
    }

    /// The attributes `save_collection` would write: staged edits if any,
    /// else the current ones.
    #[must_use]
    pub fn pending_meta(&self) -> CollectionMeta {
        self.staged
            .clone()
            .unwrap_or_else(|| self.collection.read().meta().clone())
    }

    /// Whether edits are waiting for `save_collection`.
    #[must_use]
    pub fn has_staged_changes(&self) -> bool {
        self.staged.is_some()
    }

    /// Stages new permissions.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` unless the collection is WRITE-locked.
    pub fn set_permissions(&mut self, permission: Permission) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut meta = self.pending_meta();
        meta.permission = permission;
        self.staged = Some(meta);
        Ok(())
    }

    /// Stages a new index configuration, or its removal with `None`. The
    /// source is compiled now; a broken one is rejected and nothing is
    /// staged.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` unless the collection is WRITE-locked, and
    /// `Configuration` if the source does not compile.
    pub fn set_index_config(&mut self, source: Option<&str>) -> CoreResult<Option<Arc<IndexSpec>>> {
        self.ensure_writable()?;
        let compiled = source
            .map(|s| IndexSpec::from_config_str(s, self.broker.default_index_depth()).map(Arc::new))
            .transpose()?;
        let mut meta = self.pending_meta();
        meta.index_config = source.map(str::to_string);
        self.staged = Some(meta);
        Ok(compiled)
    }

    pub(crate) fn take_staged(&mut self) -> Option<CollectionMeta> {
        self.staged.take()
    }

    pub(crate) fn collection_ref(&self) -> &CollectionRef {
        &self.collection
    }

    pub(crate) fn is_held_by(&self, broker: &Broker) -> bool {
        std::ptr::eq(self.broker, broker)
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.mode == LockMode::Write {
            Ok(())
        } else {
            Err(CoreError::illegal_state(format!(
                "collection {} is not opened for WRITE",
                self.path
            )))
        }
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` if the lock manager rejects the release.
    pub fn release(mut self) -> CoreResult<()> {
        self.released = true;
        self.broker
            .release_lock(&ResourceId::collection(self.path.as_str()), self.mode)
    }
}

impl Drop for CollectionHandle<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self
                .broker
                .release_lock(&ResourceId::collection(self.path.as_str()), self.mode)
            {
                error!(collection = %self.path, error = %e, "failed to release collection lock");
            }
        }
    }
}

impl std::fmt::Debug for CollectionHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("staged", &self.staged.is_some())
            .finish_non_exhaustive()
    }
}

/// A document opened through a broker, holding its lock.
pub struct DocumentHandle<'b> {
    broker: &'b Broker,
    collection_path: String,
    name: String,
    id: DocumentId,
    mode: LockMode,
    collection: CollectionRef,
    released: bool,
}

impl<'b> DocumentHandle<'b> {
    pub(crate) fn new(
        broker: &'b Broker,
        collection_path: String,
        name: String,
        id: DocumentId,
        mode: LockMode,
        collection: CollectionRef,
    ) -> Self {
        Self {
            broker,
            collection_path,
            name,
            id,
            mode,
            collection,
            released: false,
        }
    }

    /// Document id; also its lock key.
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// File name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the owning collection.
    #[must_use]
    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    /// Full document path.
    #[must_use]
    pub fn path(&self) -> String {
        crate::tree::path::join(&self.collection_path, &self.name)
    }

    /// Mode the document is locked in.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Current state of the document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document was removed or replaced by
    /// a different one after it was opened.
    pub fn document(&self) -> CoreResult<Document> {
        self.collection
            .read()
            .document(&self.name)
            .filter(|d| d.id == self.id)
            .cloned()
            .ok_or_else(|| CoreError::document_not_found(self.path()))
    }

    pub(crate) fn is_held_by(&self, broker: &Broker) -> bool {
        std::ptr::eq(self.broker, broker)
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.mode == LockMode::Write {
            Ok(())
        } else {
            Err(CoreError::illegal_state(format!(
                "document {} is not opened for WRITE",
                self.path()
            )))
        }
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` if the lock manager rejects the release.
    pub fn release(mut self) -> CoreResult<()> {
        self.released = true;
        self.broker
            .release_lock(&ResourceId::Document(self.id), self.mode)
    }
}

impl Drop for DocumentHandle<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self
                .broker
                .release_lock(&ResourceId::Document(self.id), self.mode)
            {
                error!(document = %self.path(), error = %e, "failed to release document lock");
            }
        }
    }
}

impl std::fmt::Debug for DocumentHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("path", &self.path())
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Result of validating a document for storage.
///
/// Produced by `Broker::validate_document` and consumed by
/// `Broker::store_document`, which refuses content other than the validated.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    /// Target collection.
    pub collection: String,
    /// File name.
    pub name: String,
    /// Hex SHA-256 of the validated content.
    pub digest: String,
    /// Content length in bytes.
    pub content_length: u64,
    /// Document being replaced, if any.
    pub replaces: Option<DocumentId>,
    /// Index rules in force for the collection.
    pub index_spec: Option<Arc<IndexSpec>>,
    /// What will be indexed.
    pub summary: IndexSummary,
}
