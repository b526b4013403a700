//! Brokers: the gateway through which a caller reaches the tree.

use crate::error::{CoreError, CoreResult};
use crate::index::{analyze, xml};
use crate::journal::LogEntry;
use crate::lock::{HolderId, LockMode, ResourceId};
use crate::pool::broker_pool::BrokerPool;
use crate::pool::handle::{CollectionHandle, DocumentHandle, IndexInfo};
use crate::transaction::{Txn, TransactionManager};
use crate::tree::{
    content_digest, path, Access, CollectionMeta, Document, Permission, Subject, TreeStore,
    XML_MIME_TYPE,
};
use crate::types::{now_millis, SequenceNumber};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A session checked out from a [`BrokerPool`].
///
/// A broker acts for one [`Subject`] and keeps a ledger of the locks it
/// holds. It goes back to the pool when dropped; locks still in the ledger
/// at that point are reported and released by the pool.
///
/// A broker is meant for one logical unit of work at a time. It is `Sync`
/// only so handles can borrow it.
pub struct Broker {
    pool: BrokerPool,
    id: HolderId,
    subject: Subject,
    ledger: Mutex<Vec<(ResourceId, LockMode)>>,
}

impl Broker {
    pub(crate) fn new(pool: BrokerPool, id: HolderId, subject: Subject) -> Self {
        Self {
            pool,
            id,
            subject,
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Broker id, used as the lock holder.
    #[must_use]
    pub fn id(&self) -> HolderId {
        self.id
    }

    /// The identity this broker acts for.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Switches the identity this broker acts for.
    pub fn set_subject(&mut self, subject: Subject) {
        self.subject = subject;
    }

    /// The pool this broker belongs to.
    #[must_use]
    pub fn pool(&self) -> &BrokerPool {
        &self.pool
    }

    fn tree(&self) -> &Arc<TreeStore> {
        self.pool.transactions().tree()
    }

    fn transactions(&self) -> &Arc<TransactionManager> {
        self.pool.transactions()
    }

    pub(crate) fn default_index_depth(&self) -> u32 {
        self.pool.config().default_index_depth
    }

    // === Transactions ===

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::begin`].
    pub fn begin(&self) -> CoreResult<Txn> {
        self.transactions().begin()
    }

    /// Commits `txn` with the configured durability.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit(&self, txn: &mut Txn) -> CoreResult<SequenceNumber> {
        self.transactions().commit(txn)
    }

    /// Aborts `txn`.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::abort`].
    pub fn abort(&self, txn: &mut Txn) -> CoreResult<()> {
        self.transactions().abort(txn)
    }

    // === Raw locks ===

    /// Acquires a lock and records it in this broker's ledger.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` on timeout.
    pub fn acquire_lock(&self, resource: &ResourceId, mode: LockMode) -> CoreResult<()> {
        self.pool.locks().acquire(resource, mode, self.id)?;
        self.ledger.lock().push((resource.clone(), mode));
        Ok(())
    }

    /// Releases a lock taken with [`Broker::acquire_lock`].
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` if this broker does not hold it.
    pub fn release_lock(&self, resource: &ResourceId, mode: LockMode) -> CoreResult<()> {
        {
            let mut ledger = self.ledger.lock();
            let position = ledger
                .iter()
                .rposition(|(r, m)| r == resource && *m == mode)
                .ok_or_else(|| {
                    CoreError::lock_failure(
                        resource.to_string(),
                        format!("{mode} released by {} without acquisition", self.id),
                    )
                })?;
            ledger.remove(position);
        }
        self.pool.locks().release(resource, mode, self.id)
    }

    /// Number of lock acquisitions not yet released.
    #[must_use]
    pub fn held_locks(&self) -> usize {
        self.ledger.lock().len()
    }

    pub(crate) fn take_ledger(&self) -> Vec<(ResourceId, LockMode)> {
        std::mem::take(&mut *self.ledger.lock())
    }

    // === Opening ===

    /// Locks and opens the collection at `path`; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` or `LockFailure`.
    pub fn open_collection(&self, path: &str, mode: LockMode) -> CoreResult<Option<CollectionHandle<'_>>> {
        let path = path::normalize(path)?;
        let resource = ResourceId::collection(path.as_str());
        self.acquire_lock(&resource, mode)?;
        match self.tree().get(&path) {
            Some(collection) => Ok(Some(CollectionHandle::new(self, path, mode, collection))),
            None => {
                self.release_lock(&resource, mode)?;
                Ok(None)
            }
        }
    }

    /// Locks and opens the document at `path`; `None` if it does not exist.
    ///
    /// The owning collection is READ-locked while the document is looked up
    /// and locked, then released again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` or `LockFailure`.
    pub fn open_document(&self, path: &str, mode: LockMode) -> CoreResult<Option<DocumentHandle<'_>>> {
        let (collection_path, name) = path::split_document(path)?;
        let Some(collection) = self.open_collection(&collection_path, LockMode::Read)? else {
            return Ok(None);
        };
        let id = collection.read().document(&name).map(|d| d.id);
        let Some(id) = id else {
            collection.release()?;
            return Ok(None);
        };
        self.acquire_lock(&ResourceId::Document(id), mode)?;
        let coll_ref = Arc::clone(collection.collection_ref());
        collection.release()?;
        Ok(Some(DocumentHandle::new(
            self,
            collection_path,
            name,
            id,
            mode,
            coll_ref,
        )))
    }

    // === Collections ===

    /// Returns the collection at `path` WRITE-locked, creating it and any
    /// missing ancestors first. Each creation is logged under `txn`.
    ///
    /// Ancestors are locked root first and released once the next level
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath`, `LockFailure`, `PermissionDenied` if the
    /// subject may not write to a parent that needs a new child, or a
    /// transaction error.
    pub fn get_or_create_collection(&self, txn: &mut Txn, path: &str) -> CoreResult<CollectionHandle<'_>> {
        txn.ensure_active()?;
        let target = path::normalize(path)?;
        let mut held: Option<String> = None;
        for current in path::lineage(&target) {
            let step = self.lock_level(txn, held.as_deref(), &current);
            if let Some(parent) = held.take() {
                self.release_lock(&ResourceId::collection(parent), LockMode::Write)?;
            }
            step?;
            held = Some(current);
        }

        let collection = self
            .tree()
            .get(&target)
            .ok_or_else(|| CoreError::collection_not_found(target.as_str()))?;
        Ok(CollectionHandle::new(self, target, LockMode::Write, collection))
    }

    /// WRITE-locks `current` and creates it if missing. Leaves nothing
    /// locked on failure.
    fn lock_level(&self, txn: &mut Txn, parent: Option<&str>, current: &str) -> CoreResult<()> {
        let resource = ResourceId::collection(current);
        self.acquire_lock(&resource, LockMode::Write)?;
        let created = match parent {
            _ if self.tree().contains(current) => Ok(()),
            Some(parent) => self.create_child(txn, parent, current),
            None => Err(CoreError::collection_not_found(current)),
        };
        if created.is_err() {
            self.release_lock(&resource, LockMode::Write)?;
        }
        created
    }

    fn create_child(&self, txn: &mut Txn, parent: &str, path: &str) -> CoreResult<()> {
        let parent_ref = self
            .tree()
            .get(parent)
            .ok_or_else(|| CoreError::collection_not_found(parent))?;
        if !parent_ref.read().permission().validate(&self.subject, Access::Write) {
            return Err(CoreError::permission_denied(format!(
                "{} may not create collections in {parent}",
                self.subject
            )));
        }
        let meta = CollectionMeta {
            path: path.to_string(),
            created: now_millis(),
            permission: Permission::for_subject(&self.subject),
            index_config: None,
        };
        self.transactions().apply(
            txn,
            LogEntry::Collection {
                path: path.to_string(),
                before: None,
                after: Some(meta),
            },
        )?;
        debug!(broker = %self.id, collection = path, "collection created");
        Ok(())
    }

    /// Writes the edits staged on `collection` under `txn`. Does nothing if
    /// none are staged.
    ///
    /// Changing permissions requires ownership; changing the index
    /// configuration requires WRITE access. DBA subjects pass both.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` for a handle of another broker or one not
    /// WRITE-locked, `PermissionDenied`, or a transaction error. On error
    /// the staged edits are discarded.
    pub fn save_collection(&self, txn: &mut Txn, collection: &mut CollectionHandle<'_>) -> CoreResult<()> {
        txn.ensure_active()?;
        self.ensure_own_collection(collection)?;
        collection.ensure_writable()?;
        let Some(after) = collection.take_staged() else {
            return Ok(());
        };
        let before = collection.read().meta().clone();

        if after.permission != before.permission
            && !before.permission.is_owner(&self.subject)
            && !self.subject.is_dba()
        {
            return Err(CoreError::permission_denied(format!(
                "{} is not the owner of {}",
                self.subject,
                collection.path()
            )));
        }
        if after.index_config != before.index_config
            && !before.permission.validate(&self.subject, Access::Write)
        {
            return Err(CoreError::permission_denied(format!(
                "{} may not configure {}",
                self.subject,
                collection.path()
            )));
        }

        self.transactions().apply(
            txn,
            LogEntry::Collection {
                path: collection.path().to_string(),
                before: Some(before),
                after: Some(after),
            },
        )
    }

    /// Removes a collection and all its documents. The collection must have
    /// no child collections.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for the root, `IllegalState` if child
    /// collections exist or the handle is not WRITE-locked,
    /// `PermissionDenied` without WRITE access on the parent, or a
    /// transaction error.
    pub fn remove_collection(&self, txn: &mut Txn, collection: CollectionHandle<'_>) -> CoreResult<()> {
        txn.ensure_active()?;
        self.ensure_own_collection(&collection)?;
        collection.ensure_writable()?;
        let path = collection.path().to_string();
        let Some(parent) = path::parent(&path) else {
            return Err(CoreError::invalid_path(path, "the root collection cannot be removed"));
        };
        if collection.read().has_children() {
            return Err(CoreError::illegal_state(format!(
                "{path} still has child collections"
            )));
        }
        let parent_ref = self
            .tree()
            .get(parent)
            .ok_or_else(|| CoreError::collection_not_found(parent))?;
        if !parent_ref.read().permission().validate(&self.subject, Access::Write) {
            return Err(CoreError::permission_denied(format!(
                "{} may not remove {path}",
                self.subject
            )));
        }

        let documents: Vec<Document> = collection.read().documents().cloned().collect();
        for doc in documents {
            let resource = ResourceId::Document(doc.id);
            self.acquire_lock(&resource, LockMode::Write)?;
            let removed = self.transactions().apply(
                txn,
                LogEntry::Document {
                    collection: path.clone(),
                    name: doc.name.clone(),
                    before: Some(Box::new(doc)),
                    after: None,
                },
            );
            self.release_lock(&resource, LockMode::Write)?;
            removed?;
        }

        let before = collection.read().meta().clone();
        self.transactions().apply(
            txn,
            LogEntry::Collection {
                path: path.clone(),
                before: Some(before),
                after: None,
            },
        )?;
        debug!(broker = %self.id, collection = %path, "collection removed");
        collection.release()
    }

    // === Documents ===

    /// Checks that `content` may be stored as `name` in `collection` and
    /// computes what the collection's index rules will index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for a bad name, `PermissionDenied` without
    /// WRITE access or when a document being replaced is user-locked by
    /// someone else, `InvalidDocument` for malformed XML, or `IllegalState`
    /// for an inactive transaction or a handle not WRITE-locked.
    pub fn validate_document(
        &self,
        txn: &Txn,
        collection: &CollectionHandle<'_>,
        name: &str,
        content: &str,
    ) -> CoreResult<IndexInfo> {
        txn.ensure_active()?;
        self.ensure_own_collection(collection)?;
        collection.ensure_writable()?;
        path::validate_name(name)?;

        let replaces = {
            let coll = collection.read();
            if !coll.permission().validate(&self.subject, Access::Write) {
                return Err(CoreError::permission_denied(format!(
                    "{} may not write to {}",
                    self.subject,
                    collection.path()
                )));
            }
            match coll.document(name) {
                Some(existing) => {
                    self.check_replaceable(existing, collection.path())?;
                    Some(existing.id)
                }
                None => None,
            }
        };

        let root = xml::parse_with_max_depth(content, self.pool.config().max_document_depth)?;
        let index_spec = self.tree().effective_index_spec(collection.path());
        let summary = analyze(index_spec.as_deref(), &root, self.default_index_depth())?;

        Ok(IndexInfo {
            collection: collection.path().to_string(),
            name: name.to_string(),
            digest: content_digest(content),
            content_length: content.len() as u64,
            replaces,
            index_spec,
            summary,
        })
    }

    fn check_replaceable(&self, existing: &Document, collection: &str) -> CoreResult<()> {
        if let Some(owner) = &existing.user_lock {
            if owner != self.subject.name() && !self.subject.is_dba() {
                return Err(CoreError::permission_denied(format!(
                    "{} is locked by {owner}",
                    existing.path_in(collection)
                )));
            }
        }
        if !existing.permission.validate(&self.subject, Access::Write) {
            return Err(CoreError::permission_denied(format!(
                "{} may not replace {}",
                self.subject,
                existing.path_in(collection)
            )));
        }
        Ok(())
    }

    /// Stores validated content, replacing a document of the same name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` if `content` differs from what was
    /// validated, `IllegalState` if `info` belongs to another collection or
    /// the collection changed since validation, or a transaction error.
    pub fn store_document(
        &self,
        txn: &mut Txn,
        collection: &CollectionHandle<'_>,
        info: IndexInfo,
        content: &str,
    ) -> CoreResult<Document> {
        txn.ensure_active()?;
        self.ensure_own_collection(collection)?;
        collection.ensure_writable()?;
        if info.collection != collection.path() {
            return Err(CoreError::illegal_state(format!(
                "{} was validated for {}, not {}",
                info.name,
                info.collection,
                collection.path()
            )));
        }
        if content_digest(content) != info.digest {
            return Err(CoreError::invalid_document(format!(
                "content of {} changed after validation",
                info.name
            )));
        }

        let before = collection.read().document(&info.name).cloned();
        if before.as_ref().map(|d| d.id) != info.replaces {
            return Err(CoreError::illegal_state(format!(
                "{} changed since validation",
                info.name
            )));
        }

        let now = now_millis();
        let document = match &before {
            Some(old) => Document {
                content: content.to_string(),
                content_length: info.content_length,
                digest: info.digest,
                modified: now,
                index: info.summary,
                ..old.clone()
            },
            None => Document {
                id: self.tree().allocate_document_id(),
                name: info.name.clone(),
                mime_type: XML_MIME_TYPE.to_string(),
                content: content.to_string(),
                content_length: info.content_length,
                digest: info.digest,
                created: now,
                modified: now,
                permission: Permission::for_subject(&self.subject),
                user_lock: None,
                index: info.summary,
            },
        };

        let resource = ResourceId::Document(document.id);
        self.acquire_lock(&resource, LockMode::Write)?;
        let stored = self.transactions().apply(
            txn,
            LogEntry::Document {
                collection: collection.path().to_string(),
                name: info.name,
                before: before.map(Box::new),
                after: Some(Box::new(document.clone())),
            },
        );
        self.release_lock(&resource, LockMode::Write)?;
        stored?;
        debug!(broker = %self.id, document = %document.path_in(collection.path()), "document stored");
        Ok(document)
    }

    /// Removes document `name` from `collection`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound`, `PermissionDenied` without WRITE access
    /// or when the document is user-locked by someone else, `LockFailure`,
    /// or a transaction error.
    pub fn remove_document(&self, txn: &mut Txn, collection: &CollectionHandle<'_>, name: &str) -> CoreResult<()> {
        txn.ensure_active()?;
        self.ensure_own_collection(collection)?;
        collection.ensure_writable()?;

        let existing = {
            let coll = collection.read();
            if !coll.permission().validate(&self.subject, Access::Write) {
                return Err(CoreError::permission_denied(format!(
                    "{} may not remove from {}",
                    self.subject,
                    collection.path()
                )));
            }
            coll.document(name)
                .cloned()
                .ok_or_else(|| CoreError::document_not_found(path::join(collection.path(), name)))?
        };
        self.check_replaceable(&existing, collection.path())?;

        let resource = ResourceId::Document(existing.id);
        self.acquire_lock(&resource, LockMode::Write)?;
        let removed = self.transactions().apply(
            txn,
            LogEntry::Document {
                collection: collection.path().to_string(),
                name: name.to_string(),
                before: Some(Box::new(existing)),
                after: None,
            },
        );
        self.release_lock(&resource, LockMode::Write)?;
        removed?;
        debug!(broker = %self.id, document = %path::join(collection.path(), name), "document removed");
        Ok(())
    }

    /// Replaces a document's permissions. Only the owner or a DBA may.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `IllegalState` for a handle not
    /// WRITE-locked, or a transaction error.
    pub fn set_document_permissions(
        &self,
        txn: &mut Txn,
        document: &DocumentHandle<'_>,
        permission: Permission,
    ) -> CoreResult<()> {
        let current = self.writable_document(txn, document)?;
        if !current.permission.is_owner(&self.subject) && !self.subject.is_dba() {
            return Err(CoreError::permission_denied(format!(
                "{} is not the owner of {}; owner = {}",
                self.subject,
                document.path(),
                current.permission.owner()
            )));
        }
        let updated = Document {
            permission,
            ..current.clone()
        };
        self.update_document(txn, document, current, updated)
    }

    /// Claims the advisory user lock on a document for `user`.
    ///
    /// Requires UPDATE access. Claiming it for someone else, or taking it
    /// over from someone else, requires DBA. Claiming it again for the
    /// current owner is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `IllegalState` for a handle not
    /// WRITE-locked, or a transaction error.
    pub fn lock_document(&self, txn: &mut Txn, document: &DocumentHandle<'_>, user: &str) -> CoreResult<()> {
        let current = self.writable_document(txn, document)?;
        if !current.permission.validate(&self.subject, Access::Update) {
            return Err(CoreError::permission_denied(format!(
                "{} may not lock {}",
                self.subject,
                document.path()
            )));
        }
        if user != self.subject.name() && !self.subject.is_dba() {
            return Err(CoreError::permission_denied(format!(
                "{} may not lock {} for {user}",
                self.subject,
                document.path()
            )));
        }
        match current.user_lock.as_deref() {
            Some(owner) if owner == user => return Ok(()),
            Some(owner) if owner != self.subject.name() && !self.subject.is_dba() => {
                return Err(CoreError::permission_denied(format!(
                    "{} is already locked by {owner}",
                    document.path()
                )));
            }
            _ => {}
        }
        let updated = Document {
            user_lock: Some(user.to_string()),
            ..current.clone()
        };
        self.update_document(txn, document, current, updated)
    }

    /// Clears the advisory user lock. Only its owner or a DBA may.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `IllegalState` for a handle not
    /// WRITE-locked, or a transaction error.
    pub fn unlock_document(&self, txn: &mut Txn, document: &DocumentHandle<'_>) -> CoreResult<()> {
        let current = self.writable_document(txn, document)?;
        match current.user_lock.as_deref() {
            None => return Ok(()),
            Some(owner) if owner != self.subject.name() && !self.subject.is_dba() => {
                return Err(CoreError::permission_denied(format!(
                    "{} is locked by {owner}",
                    document.path()
                )));
            }
            Some(_) => {}
        }
        let updated = Document {
            user_lock: None,
            ..current.clone()
        };
        self.update_document(txn, document, current, updated)
    }

    /// The account holding the advisory user lock, if any.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document is gone.
    pub fn user_lock(&self, document: &DocumentHandle<'_>) -> CoreResult<Option<String>> {
        Ok(document.document()?.user_lock)
    }

    fn writable_document(&self, txn: &Txn, document: &DocumentHandle<'_>) -> CoreResult<Document> {
        txn.ensure_active()?;
        if !document.is_held_by(self) {
            return Err(CoreError::illegal_state(format!(
                "{} was opened by another broker",
                document.path()
            )));
        }
        document.ensure_writable()?;
        document.document()
    }

    fn update_document(
        &self,
        txn: &mut Txn,
        document: &DocumentHandle<'_>,
        before: Document,
        after: Document,
    ) -> CoreResult<()> {
        self.transactions().apply(
            txn,
            LogEntry::Document {
                collection: document.collection_path().to_string(),
                name: document.name().to_string(),
                before: Some(Box::new(before)),
                after: Some(Box::new(after)),
            },
        )
    }

    fn ensure_own_collection(&self, collection: &CollectionHandle<'_>) -> CoreResult<()> {
        if collection.is_held_by(self) {
            Ok(())
        } else {
            Err(CoreError::illegal_state(format!(
                "{} was opened by another broker",
                collection.path()
            )))
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.pool.return_broker(self);
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("id", &self.id)
            .field("subject", &self.subject.name())
            .field("held_locks", &self.held_locks())
            .finish_non_exhaustive()
    }
}
