//! Journal records and their payload encoding.

use crate::error::{CoreError, CoreResult};
use crate::tree::{CollectionMeta, Document};
use crate::types::{SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"AJNL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Envelope header: magic (4) + version (2) + type (1) + length (4).
pub const HEADER_SIZE: usize = 11;

/// Trailing CRC32 size.
pub const CRC_SIZE: usize = 4;

/// Type byte of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Transaction start.
    Begin = 1,
    /// One mutation.
    Entry = 2,
    /// Commit marker.
    Commit = 3,
    /// Abort marker, written after the transaction's undo.
    Abort = 4,
    /// Checkpoint marker.
    Checkpoint = 5,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Entry),
            3 => Some(Self::Commit),
            4 => Some(Self::Abort),
            5 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logged mutation, carrying the before and after image of what it
/// touched. `None` means "absent": a `None` before image is a creation, a
/// `None` after image a removal. Installing an image is idempotent, which
/// makes both redo and undo safe to repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A collection was created, saved or removed.
    Collection {
        /// Normalized collection path.
        path: String,
        /// Image before the change.
        before: Option<CollectionMeta>,
        /// Image after the change.
        after: Option<CollectionMeta>,
    },
    /// A document was stored, replaced, updated or removed.
    Document {
        /// Path of the owning collection.
        collection: String,
        /// File name.
        name: String,
        /// Image before the change.
        before: Option<Box<Document>>,
        /// Image after the change.
        after: Option<Box<Document>>,
    },
}

impl LogEntry {
    /// Short human-readable description, e.g. `store /db/test/a.xml`.
    #[must_use]
    pub fn describe(&self) -> String {
        let (verb, target) = match self {
            Self::Collection {
                path,
                before,
                after,
            } => (verb(before.is_some(), after.is_some()), path.clone()),
            Self::Document {
                collection,
                name,
                before,
                after,
            } => (
                verb(before.is_some(), after.is_some()),
                crate::tree::path::join(collection, name),
            ),
        };
        format!("{verb} {target}")
    }

    /// The entry that reverses this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self.clone() {
            Self::Collection {
                path,
                before,
                after,
            } => Self::Collection {
                path,
                before: after,
                after: before,
            },
            Self::Document {
                collection,
                name,
                before,
                after,
            } => Self::Document {
                collection,
                name,
                before: after,
                after: before,
            },
        }
    }

    /// CBOR encoding.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if serialization fails.
    pub fn to_cbor(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a CBOR-encoded entry.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` if the bytes are not a valid entry.
    pub fn from_cbor(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| CoreError::journal_corruption(format!("undecodable entry: {e}")))
    }
}

fn verb(before: bool, after: bool) -> &'static str {
    match (before, after) {
        (false, true) => "create",
        (true, true) => "update",
        (true, false) => "remove",
        (false, false) => "noop",
    }
}

/// A record in the journal.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// Transaction start.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// A mutation, written before it is applied.
    Entry {
        /// Owning transaction.
        txid: TransactionId,
        /// The mutation.
        entry: LogEntry,
    },
    /// Commit marker.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Commit sequence number.
        sequence: SequenceNumber,
    },
    /// Abort marker. Appended once the transaction's entries have been undone
    /// in memory.
    Abort {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// Checkpoint marker. The snapshot written just before it reflects every
    /// record up to this point; recovery starts at `scan_from`.
    Checkpoint {
        /// Last committed sequence at checkpoint time.
        sequence: SequenceNumber,
        /// Offset of the oldest record recovery must still read.
        scan_from: u64,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Entry { .. } => RecordType::Entry,
            Self::Commit { .. } => RecordType::Commit,
            Self::Abort { .. } => RecordType::Abort,
            Self::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// Returns the owning transaction, if any.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Entry { txid, .. }
            | Self::Commit { txid, .. }
            | Self::Abort { txid } => Some(*txid),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if an entry cannot be serialized.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txid } | Self::Abort { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }
            Self::Entry { txid, entry } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&entry.to_cbor()?);
            }
            Self::Commit { txid, sequence } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
            Self::Checkpoint {
                sequence,
                scan_from,
            } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                buf.extend_from_slice(&scan_from.to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` for short or oversized payloads and
    /// undecodable entries.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> CoreResult<Self> {
        let word = |i: usize| -> CoreResult<u64> {
            payload
                .get(i * 8..i * 8 + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .ok_or_else(|| CoreError::journal_corruption("unexpected end of payload"))
        };
        let exact = |words: usize| -> CoreResult<()> {
            if payload.len() == words * 8 {
                Ok(())
            } else {
                Err(CoreError::journal_corruption(format!(
                    "{record_type:?} record: expected {} payload bytes, got {}",
                    words * 8,
                    payload.len()
                )))
            }
        };

        match record_type {
            RecordType::Begin => {
                exact(1)?;
                Ok(Self::Begin {
                    txid: TransactionId::new(word(0)?),
                })
            }
            RecordType::Entry => Ok(Self::Entry {
                txid: TransactionId::new(word(0)?),
                entry: LogEntry::from_cbor(&payload[8..])?,
            }),
            RecordType::Commit => {
                exact(2)?;
                Ok(Self::Commit {
                    txid: TransactionId::new(word(0)?),
                    sequence: SequenceNumber::new(word(1)?),
                })
            }
            RecordType::Abort => {
                exact(1)?;
                Ok(Self::Abort {
                    txid: TransactionId::new(word(0)?),
                })
            }
            RecordType::Checkpoint => {
                exact(2)?;
                Ok(Self::Checkpoint {
                    sequence: SequenceNumber::new(word(0)?),
                    scan_from: word(1)?,
                })
            }
        }
    }

    /// Encodes the full record: `magic | version | type | length | payload | crc32`.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if the payload cannot be serialized or exceeds
    /// 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::encoding("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// CRC32 (IEEE polynomial) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Permission;

    fn meta(path: &str) -> CollectionMeta {
        CollectionMeta {
            path: path.into(),
            created: 7,
            permission: Permission::new("admin", "dba", 0o755),
            index_config: None,
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn entry_payload_survives_cbor() {
        let record = JournalRecord::Entry {
            txid: TransactionId::new(3),
            entry: LogEntry::Collection {
                path: "/db/test".into(),
                before: None,
                after: Some(meta("/db/test")),
            },
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(
            JournalRecord::decode_payload(RecordType::Entry, &payload).unwrap(),
            record
        );
    }

    #[test]
    fn fixed_records_reject_trailing_bytes() {
        let mut payload = JournalRecord::Begin {
            txid: TransactionId::new(1),
        }
        .encode_payload()
        .unwrap();
        payload.push(0);
        assert!(matches!(
            JournalRecord::decode_payload(RecordType::Begin, &payload),
            Err(CoreError::JournalCorruption { .. })
        ));
        assert!(JournalRecord::decode_payload(RecordType::Commit, &[0; 8]).is_err());
        assert!(JournalRecord::decode_payload(RecordType::Entry, &[1, 2]).is_err());
    }

    #[test]
    fn inverse_swaps_images() {
        let entry = LogEntry::Collection {
            path: "/db/a".into(),
            before: None,
            after: Some(meta("/db/a")),
        };
        assert_eq!(entry.describe(), "create /db/a");
        let inverse = entry.inverse();
        assert_eq!(inverse.describe(), "remove /db/a");
        assert_eq!(inverse.inverse(), entry);
    }

    #[test]
    fn envelope_layout() {
        let bytes = JournalRecord::Abort {
            txid: TransactionId::new(9),
        }
        .encode()
        .unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 8 + CRC_SIZE);
        assert_eq!(&bytes[..4], &JOURNAL_MAGIC);
        assert_eq!(bytes[6], RecordType::Abort.as_byte());
        let crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(crc, compute_crc32(&bytes[..bytes.len() - 4]));
    }
}
