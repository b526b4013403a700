//! Stored documents.

use crate::index::IndexSummary;
use crate::tree::security::Permission;
use crate::types::DocumentId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Mime type given to documents stored without one.
pub const XML_MIME_TYPE: &str = "application/xml";

/// A document inside one collection.
///
/// The struct doubles as the journal image of the document: redo installs
/// it, undo reinstalls the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable id, used as the lock key.
    pub id: DocumentId,
    /// File name within the collection.
    pub name: String,
    /// Mime type.
    pub mime_type: String,
    /// Serialized content.
    pub content: String,
    /// Content length in bytes.
    pub content_length: u64,
    /// Hex SHA-256 of the content.
    pub digest: String,
    /// Creation time, ms since the epoch.
    pub created: u64,
    /// Last modification time, ms since the epoch.
    pub modified: u64,
    /// Access rights.
    pub permission: Permission,
    /// Advisory editorial lock: the account that claimed the document.
    pub user_lock: Option<String>,
    /// What the index rules selected when the document was stored.
    pub index: IndexSummary,
}

impl Document {
    /// Full path of the document inside `collection`.
    #[must_use]
    pub fn path_in(&self, collection: &str) -> String {
        crate::tree::path::join(collection, &self.name)
    }
}

/// Hex SHA-256 of `content`.
#[must_use]
pub fn content_digest(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(content_digest("<a/>"), content_digest("<b/>"));
    }
}
