//! Collections.

use crate::error::CoreResult;
use crate::index::IndexSpec;
use crate::tree::document::Document;
use crate::tree::path;
use crate::tree::security::Permission;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The persistent attributes of a collection; also its journal image.
///
/// Child collections and documents are not part of the image. They change
/// through their own journal entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// Normalized path.
    pub path: String,
    /// Creation time, ms since the epoch.
    pub created: u64,
    /// Access rights.
    pub permission: Permission,
    /// Index configuration source, if this collection has its own.
    pub index_config: Option<String>,
}

/// A collection as held in memory.
#[derive(Debug, Clone)]
pub struct Collection {
    meta: CollectionMeta,
    children: BTreeSet<String>,
    documents: BTreeMap<String, Document>,
    index_spec: Option<Arc<IndexSpec>>,
}

impl Collection {
    /// Builds a collection from its image, compiling its index configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the stored index configuration does not
    /// compile.
    pub fn from_meta(meta: CollectionMeta, default_depth: u32) -> CoreResult<Self> {
        let index_spec = compile(&meta, default_depth)?;
        Ok(Self {
            meta,
            children: BTreeSet::new(),
            documents: BTreeMap::new(),
            index_spec,
        })
    }

    /// Replaces the image, keeping children and documents.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the new index configuration does not
    /// compile; the collection is left unchanged.
    pub fn set_meta(&mut self, meta: CollectionMeta, default_depth: u32) -> CoreResult<()> {
        let index_spec = if meta.index_config == self.meta.index_config {
            self.index_spec.clone()
        } else {
            compile(&meta, default_depth)?
        };
        self.meta = meta;
        self.index_spec = index_spec;
        Ok(())
    }

    /// Normalized path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.meta.path
    }

    /// Last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        path::file_name(&self.meta.path)
    }

    /// The journal image.
    #[must_use]
    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    /// Creation time.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.meta.created
    }

    /// Access rights.
    #[must_use]
    pub fn permission(&self) -> &Permission {
        &self.meta.permission
    }

    /// This collection's own compiled index rules, not inherited ones.
    #[must_use]
    pub fn own_index_spec(&self) -> Option<&Arc<IndexSpec>> {
        self.index_spec.as_ref()
    }

    /// Names of child collections, sorted.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    /// Whether the collection has child collections.
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Document by file name.
    #[must_use]
    pub fn document(&self, name: &str) -> Option<&Document> {
        self.documents.get(name)
    }

    /// Documents sorted by name.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Number of documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn add_child(&mut self, name: &str) {
        self.children.insert(name.to_string());
    }

    pub(crate) fn remove_child(&mut self, name: &str) {
        self.children.remove(name);
    }

    pub(crate) fn put_document(&mut self, document: Document) {
        self.documents.insert(document.name.clone(), document);
    }

    pub(crate) fn take_document(&mut self, name: &str) -> Option<Document> {
        self.documents.remove(name)
    }
}

fn compile(meta: &CollectionMeta, default_depth: u32) -> CoreResult<Option<Arc<IndexSpec>>> {
    meta.index_config
        .as_deref()
        .map(|source| IndexSpec::from_config_str(source, default_depth).map(Arc::new))
        .transpose()
}
