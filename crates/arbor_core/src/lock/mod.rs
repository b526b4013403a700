//! Multi-granularity read/write locks over collections and documents.
//!
//! Locks are keyed by [`ResourceId`] and owned by a [`HolderId`] (one per
//! broker). They are reentrant per holder: every successful acquisition must
//! be matched by exactly one release. A holder that owns WRITE may take READ
//! freely; a holder that is the sole reader may upgrade to WRITE.
//!
//! There is no deadlock detection. Callers lock parent collections before
//! children and rely on the acquisition timeout to break cycles.

mod manager;

pub use manager::LockManager;

use crate::types::DocumentId;
use std::fmt;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared; compatible with other readers.
    Read,
    /// Exclusive.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}

/// Identity of a lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A collection, by normalized path.
    Collection(String),
    /// A document, by id.
    Document(DocumentId),
}

impl ResourceId {
    /// Lock key for the collection at `path`.
    pub fn collection(path: impl Into<String>) -> Self {
        Self::Collection(path.into())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(path) => write!(f, "collection {path}"),
            Self::Document(id) => write!(f, "document {id}"),
        }
    }
}

/// Owner of lock acquisitions. Brokers use their own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HolderId(pub u64);

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "holder:{}", self.0)
    }
}
