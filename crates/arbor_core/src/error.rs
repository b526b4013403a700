//! Error types for Arbor core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Arbor core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] arbor_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A lock could not be acquired in time, or was released without being held.
    #[error("lock failure on {resource}: {message}")]
    LockFailure {
        /// The resource the lock guards.
        resource: String,
        /// What went wrong.
        message: String,
        /// Whether the failure was a timeout (and may be retried).
        timed_out: bool,
    },

    /// No broker became free within the checkout budget.
    #[error("broker pool exhausted: no broker free after {waited:?} (max {max})")]
    PoolExhausted {
        /// How long the caller waited.
        waited: Duration,
        /// Pool capacity.
        max: usize,
    },

    /// Invalid index or collection configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The journal could not be written or flushed. The owning transaction
    /// has been aborted.
    #[error("transaction log error: {message}")]
    TransactionLog {
        /// Description of the failure.
        message: String,
    },

    /// The subject lacks a required permission.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied access.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Journal is corrupted.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Tree snapshot is corrupted.
    #[error("snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid on-disk format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// CBOR encoding or decoding failed.
    #[error("encoding error: {message}")]
    Encoding {
        /// Description of the failure.
        message: String,
    },

    /// Database directory is held by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The pool has been shut down.
    #[error("database is closed")]
    DatabaseClosed,

    /// Collection not found.
    #[error("collection not found: {path}")]
    CollectionNotFound {
        /// Path of the collection.
        path: String,
    },

    /// Document not found.
    #[error("document not found: {path}")]
    DocumentNotFound {
        /// Path of the document.
        path: String,
    },

    /// Document content is not well-formed.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// Path is malformed or outside the root collection.
    #[error("invalid path '{path}': {message}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        message: String,
    },
}

impl CoreError {
    /// Creates a lock failure for a timed-out acquisition.
    pub fn lock_timeout(resource: impl Into<String>, waited: Duration) -> Self {
        Self::LockFailure {
            resource: resource.into(),
            message: format!("not acquired within {waited:?}"),
            timed_out: true,
        }
    }

    /// Creates a lock failure for an illegal acquire or release.
    pub fn lock_failure(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LockFailure {
            resource: resource.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a transaction log error.
    pub fn transaction_log(message: impl Into<String>) -> Self {
        Self::TransactionLog {
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates a collection-not-found error.
    pub fn collection_not_found(path: impl Into<String>) -> Self {
        Self::CollectionNotFound { path: path.into() }
    }

    /// Creates a document-not-found error.
    pub fn document_not_found(path: impl Into<String>) -> Self {
        Self::DocumentNotFound { path: path.into() }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation as-is.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::LockFailure { timed_out: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(CoreError::lock_timeout("/db", Duration::from_millis(5)).is_transient());
        assert!(CoreError::PoolExhausted {
            waited: Duration::from_secs(1),
            max: 1
        }
        .is_transient());
        assert!(!CoreError::lock_failure("/db", "not held").is_transient());
        assert!(!CoreError::transaction_log("disk full").is_transient());
    }

    #[test]
    fn messages_name_the_resource() {
        let err = CoreError::lock_failure("/db/test", "release without acquire");
        assert_eq!(
            err.to_string(),
            "lock failure on /db/test: release without acquire"
        );
        let err = CoreError::invalid_path("db", "must start with /db");
        assert_eq!(err.to_string(), "invalid path 'db': must start with /db");
    }
}
