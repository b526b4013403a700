//! Tree snapshots.
//!
//! A snapshot is the whole tree written at a checkpoint:
//!
//! ```text
//! | magic "ASNP" (4) | version (2) | length (4) | CBOR body (N) | crc32 (4) |
//! ```
//!
//! Together with the journal records after the checkpoint it reproduces the
//! state at any later moment. A snapshot that fails its checksum is never
//! repaired; opening fails with `SnapshotCorruption`.

use crate::error::{CoreError, CoreResult};
use crate::journal::compute_crc32;
use crate::tree::collection::CollectionMeta;
use crate::tree::document::Document;
use arbor_storage::StorageBackend;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Snapshot magic bytes.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"ASNP";

/// Current snapshot version.
pub const SNAPSHOT_VERSION: u16 = 1;

const PREFIX_SIZE: usize = 10;

/// One collection with its documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionImage {
    /// Collection attributes.
    pub meta: CollectionMeta,
    /// Every document in the collection.
    pub documents: Vec<Document>,
}

/// Whole-tree image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Next document id to hand out.
    pub next_document_id: u64,
    /// All collections, in any order.
    pub collections: Vec<CollectionImage>,
}

impl TreeSnapshot {
    /// Encodes the snapshot with its envelope.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if CBOR serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CoreError::encoding(format!("snapshot: {e}")))?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::encoding("snapshot larger than 4 GiB"))?;

        let mut buf = Vec::with_capacity(PREFIX_SIZE + body.len() + 4);
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes an encoded snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotCorruption` for a damaged or truncated envelope and
    /// `ChecksumMismatch` when the body fails its CRC.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < PREFIX_SIZE + 4 || data[..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::snapshot_corruption("invalid snapshot header"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > SNAPSHOT_VERSION {
            return Err(CoreError::snapshot_corruption(format!(
                "unsupported snapshot version {version}"
            )));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if data.len() != PREFIX_SIZE + len + 4 {
            return Err(CoreError::snapshot_corruption(format!(
                "snapshot length {} does not match header ({len} byte body)",
                data.len()
            )));
        }

        let (covered, crc_bytes) = data.split_at(PREFIX_SIZE + len);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = compute_crc32(covered);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        ciborium::from_reader(&covered[PREFIX_SIZE..])
            .map_err(|e| CoreError::snapshot_corruption(format!("snapshot body: {e}")))
    }
}

/// Where snapshots live.
pub enum SnapshotStore {
    /// A file replaced atomically through a temporary sibling.
    File(PathBuf),
    /// A storage backend rewritten in place.
    Backend(Mutex<Box<dyn StorageBackend>>),
}

impl SnapshotStore {
    /// Store writing to `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Store writing to `backend`.
    #[must_use]
    pub fn backend(backend: Box<dyn StorageBackend>) -> Self {
        Self::Backend(Mutex::new(backend))
    }

    /// Reads the last saved snapshot, `None` if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or a decoding error from [`TreeSnapshot::decode`].
    pub fn load(&self) -> CoreResult<Option<TreeSnapshot>> {
        let data = match self {
            Self::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                fs::read(path)?
            }
            Self::Backend(backend) => {
                let backend = backend.lock();
                let size = usize::try_from(backend.size()?)
                    .map_err(|_| CoreError::snapshot_corruption("snapshot too large"))?;
                backend.read_at(0, size)?
            }
        };
        if data.is_empty() {
            return Ok(None);
        }
        TreeSnapshot::decode(&data).map(Some)
    }

    /// Durably replaces the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error; for the file store the previous
    /// snapshot is still intact afterwards.
    pub fn save(&self, snapshot: &TreeSnapshot) -> CoreResult<()> {
        let data = snapshot.encode()?;
        match self {
            Self::File(path) => write_atomically(path, &data),
            Self::Backend(backend) => {
                let mut backend = backend.lock();
                backend.truncate(0)?;
                backend.append(&data)?;
                backend.sync()?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Backend(_) => f.write_str("Backend"),
        }
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> CoreResult<()> {
    let temp = path.with_extension("tmp");
    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp, path)?;

    #[cfg(unix)]
    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}
