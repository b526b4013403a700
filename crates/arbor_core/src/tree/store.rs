//! The in-memory collection tree.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexSpec;
use crate::journal::LogEntry;
use crate::tree::collection::{Collection, CollectionMeta};
use crate::tree::document::Document;
use crate::tree::path;
use crate::tree::snapshot::{CollectionImage, TreeSnapshot};
use crate::types::DocumentId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to one collection's in-memory state.
pub type CollectionRef = Arc<RwLock<Collection>>;

/// All collections by path.
///
/// The store's own locks only keep its maps consistent. Callers still need
/// the matching collection or document lock from the lock manager before
/// they read or change anything.
#[derive(Debug)]
pub struct TreeStore {
    collections: RwLock<BTreeMap<String, CollectionRef>>,
    next_document_id: AtomicU64,
    default_index_depth: u32,
}

impl TreeStore {
    /// An empty tree.
    #[must_use]
    pub fn new(default_index_depth: u32) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            next_document_id: AtomicU64::new(1),
            default_index_depth,
        }
    }

    /// Index depth used for collections without their own configuration.
    #[must_use]
    pub fn default_index_depth(&self) -> u32 {
        self.default_index_depth
    }

    /// Collection at a normalized path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<CollectionRef> {
        self.collections.read().get(path).cloned()
    }

    /// Whether a collection exists.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.collections.read().contains_key(path)
    }

    /// All collection paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    /// Whether the tree has no collections at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }

    /// Hands out a fresh document id.
    pub fn allocate_document_id(&self) -> DocumentId {
        DocumentId::new(self.next_document_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The id the next allocation will return.
    #[must_use]
    pub fn next_document_id(&self) -> u64 {
        self.next_document_id.load(Ordering::SeqCst)
    }

    /// Index rules in force for `path`: its own, else the nearest ancestor's.
    /// The compiled rules are shared, not copied.
    #[must_use]
    pub fn effective_index_spec(&self, path: &str) -> Option<Arc<IndexSpec>> {
        let collections = self.collections.read();
        let mut current = Some(path);
        while let Some(p) = current {
            if let Some(spec) = collections
                .get(p)
                .and_then(|c| c.read().own_index_spec().cloned())
            {
                return Some(spec);
            }
            current = path::parent(p);
        }
        None
    }

    /// Checks, without changing anything, that redoing `entry` would succeed.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for a missing parent or owning
    /// collection and `Configuration` for an index configuration that does
    /// not compile.
    pub fn check(&self, entry: &LogEntry) -> CoreResult<()> {
        if let LogEntry::Collection {
            after: Some(CollectionMeta {
                index_config: Some(source),
                ..
            }),
            ..
        } = entry
        {
            IndexSpec::from_config_str(source, self.default_index_depth)?;
        }
        match self.missing_container(entry) {
            Some(container) => Err(CoreError::collection_not_found(container)),
            None => Ok(()),
        }
    }

    /// The collection that must exist before the after image of `entry` can
    /// be installed, if it is missing. Removals never need one.
    #[must_use]
    pub fn missing_container<'e>(&self, entry: &'e LogEntry) -> Option<&'e str> {
        match entry {
            LogEntry::Collection {
                path, after: Some(_), ..
            } => path::parent(path).filter(|parent| !self.contains(path) && !self.contains(parent)),
            LogEntry::Document {
                collection,
                after: Some(_),
                ..
            } => Some(collection.as_str()).filter(|c| !self.contains(c)),
            _ => None,
        }
    }

    /// Installs the after image of `entry`.
    ///
    /// # Errors
    ///
    /// See [`TreeStore::apply_collection`] and [`TreeStore::apply_document`].
    pub fn redo(&self, entry: &LogEntry) -> CoreResult<()> {
        match entry {
            LogEntry::Collection { path, after, .. } => self.apply_collection(path, after.as_ref()),
            LogEntry::Document {
                collection,
                name,
                after,
                ..
            } => self.apply_document(collection, name, after.as_deref()),
        }
    }

    /// Installs the before image of `entry`.
    ///
    /// # Errors
    ///
    /// See [`TreeStore::apply_collection`] and [`TreeStore::apply_document`].
    pub fn undo(&self, entry: &LogEntry) -> CoreResult<()> {
        self.redo(&entry.inverse())
    }

    /// Makes the collection at `path` match `image`: created or updated for
    /// `Some`, removed for `None`. Repeating a call changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` when creating a collection whose parent
    /// does not exist, and `Configuration` when the image's index
    /// configuration does not compile.
    pub fn apply_collection(&self, path: &str, image: Option<&CollectionMeta>) -> CoreResult<()> {
        let mut collections = self.collections.write();
        match image {
            Some(meta) => {
                if let Some(existing) = collections.get(path) {
                    return existing
                        .write()
                        .set_meta(meta.clone(), self.default_index_depth);
                }
                let collection = Collection::from_meta(meta.clone(), self.default_index_depth)?;
                if let Some(parent) = path::parent(path) {
                    let parent_ref = collections.get(parent).ok_or_else(|| {
                        CoreError::journal_corruption(format!(
                            "collection {path} created before its parent"
                        ))
                    })?;
                    parent_ref.write().add_child(path::file_name(path));
                }
                collections.insert(path.to_string(), Arc::new(RwLock::new(collection)));
            }
            None => {
                if collections.remove(path).is_some() {
                    if let Some(parent) = path::parent(path).and_then(|p| collections.get(p)) {
                        parent.write().remove_child(path::file_name(path));
                    }
                }
            }
        }
        Ok(())
    }

    /// Makes document `name` in `collection` match `image`.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` if the collection does not exist while
    /// installing a document.
    pub fn apply_document(&self, collection: &str, name: &str, image: Option<&Document>) -> CoreResult<()> {
        let Some(coll) = self.get(collection) else {
            if image.is_none() {
                return Ok(());
            }
            return Err(CoreError::journal_corruption(format!(
                "document {name} stored into missing collection {collection}"
            )));
        };
        let mut coll = coll.write();
        match image {
            Some(doc) => {
                self.next_document_id
                    .fetch_max(doc.id.as_u64() + 1, Ordering::SeqCst);
                coll.put_document(doc.clone());
            }
            None => {
                coll.take_document(name);
            }
        }
        Ok(())
    }

    /// Captures the whole tree.
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        let collections = self.collections.read();
        TreeSnapshot {
            next_document_id: self.next_document_id(),
            collections: collections
                .values()
                .map(|c| {
                    let c = c.read();
                    CollectionImage {
                        meta: c.meta().clone(),
                        documents: c.documents().cloned().collect(),
                    }
                })
                .collect(),
        }
    }

    /// Rebuilds a tree from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotCorruption` if a collection appears without its
    /// parent, or `Configuration` for an index configuration that no longer
    /// compiles.
    pub fn restore(snapshot: TreeSnapshot, default_index_depth: u32) -> CoreResult<Self> {
        let store = Self::new(default_index_depth);
        // Sorted paths put every parent before its children.
        let mut images = snapshot.collections;
        images.sort_by(|a, b| a.meta.path.cmp(&b.meta.path));
        for image in images {
            let path = image.meta.path.clone();
            if let Some(parent) = path::parent(&path) {
                if !store.contains(parent) {
                    return Err(CoreError::snapshot_corruption(format!(
                        "collection {path} has no parent in snapshot"
                    )));
                }
            }
            store.apply_collection(&path, Some(&image.meta))?;
            for doc in image.documents {
                store.apply_document(&path, &doc.name.clone(), Some(&doc))?;
            }
        }
        store
            .next_document_id
            .fetch_max(snapshot.next_document_id, Ordering::SeqCst);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSummary;
    use crate::tree::security::Permission;

    fn meta(path: &str, config: Option<&str>) -> CollectionMeta {
        CollectionMeta {
            path: path.into(),
            created: 1,
            permission: Permission::new("admin", "dba", 0o755),
            index_config: config.map(str::to_string),
        }
    }

    fn doc(id: u64, name: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            name: name.into(),
            mime_type: "application/xml".into(),
            content: "<a/>".into(),
            content_length: 4,
            digest: String::new(),
            created: 1,
            modified: 1,
            permission: Permission::new("admin", "dba", 0o755),
            user_lock: None,
            index: IndexSummary::default(),
        }
    }

    fn create_tree() -> TreeStore {
        let tree = TreeStore::new(1);
        tree.apply_collection("/db", Some(&meta("/db", None))).unwrap();
        tree.apply_collection("/db/test", Some(&meta("/db/test", None)))
            .unwrap();
        tree
    }

    #[test]
    fn children_follow_creation_and_removal() {
        let tree = create_tree();
        let root = tree.get("/db").unwrap();
        assert_eq!(root.read().child_names().collect::<Vec<_>>(), ["test"]);
        tree.apply_collection("/db/test", None).unwrap();
        assert!(!root.read().has_children());
        tree.apply_collection("/db/test", None).unwrap();
    }

    #[test]
    fn orphan_collection_is_rejected() {
        let tree = TreeStore::new(1);
        assert!(matches!(
            tree.apply_collection("/db/x", Some(&meta("/db/x", None))),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn missing_container_names_absent_parent() {
        let tree = create_tree();
        let child = LogEntry::Collection {
            path: "/db/gone/x".into(),
            before: None,
            after: Some(meta("/db/gone/x", None)),
        };
        assert_eq!(tree.missing_container(&child), Some("/db/gone"));
        let stored = LogEntry::Document {
            collection: "/db/gone".into(),
            name: "a.xml".into(),
            before: None,
            after: Some(Box::new(doc(1, "a.xml"))),
        };
        assert_eq!(tree.missing_container(&stored), Some("/db/gone"));
        assert_eq!(tree.missing_container(&stored.inverse()), None);
        assert!(matches!(
            tree.check(&stored),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn redo_and_undo_are_idempotent() {
        let tree = create_tree();
        let entry = LogEntry::Document {
            collection: "/db/test".into(),
            name: "a.xml".into(),
            before: None,
            after: Some(Box::new(doc(5, "a.xml"))),
        };
        tree.redo(&entry).unwrap();
        tree.redo(&entry).unwrap();
        assert_eq!(tree.get("/db/test").unwrap().read().document_count(), 1);
        assert_eq!(tree.next_document_id(), 6);
        tree.undo(&entry).unwrap();
        tree.undo(&entry).unwrap();
        assert_eq!(tree.get("/db/test").unwrap().read().document_count(), 0);
    }

    #[test]
    fn index_spec_is_inherited_by_reference() {
        let tree = TreeStore::new(1);
        tree.apply_collection("/db", Some(&meta("/db", Some(r#"<index index-depth="4"/>"#))))
            .unwrap();
        tree.apply_collection("/db/a", Some(&meta("/db/a", None))).unwrap();
        tree.apply_collection("/db/a/b", Some(&meta("/db/a/b", None)))
            .unwrap();

        let own = tree.effective_index_spec("/db").unwrap();
        let inherited = tree.effective_index_spec("/db/a/b").unwrap();
        assert!(Arc::ptr_eq(&own, &inherited));
        assert_eq!(inherited.index_depth(), 4);
    }

    #[test]
    fn snapshot_restores_tree() {
        let tree = create_tree();
        tree.apply_document("/db/test", "a.xml", Some(&doc(3, "a.xml")))
            .unwrap();
        let restored = TreeStore::restore(tree.snapshot(), 1).unwrap();
        assert_eq!(restored.paths(), ["/db", "/db/test"]);
        assert!(restored
            .get("/db/test")
            .unwrap()
            .read()
            .document("a.xml")
            .is_some());
        assert_eq!(restored.allocate_document_id(), DocumentId::new(4));
    }
}
