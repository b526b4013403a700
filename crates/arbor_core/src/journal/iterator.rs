//! Streaming journal reader.

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{
    compute_crc32, JournalRecord, RecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
use arbor_storage::StorageBackend;
use parking_lot::MutexGuard;

/// Reads journal records one at a time, holding the journal lock.
///
/// A header or record cut short by the end of the journal is a crash during
/// an unsynced write: the iterator stops cleanly. Bad magic, an unknown type,
/// a future version or a CRC mismatch is corruption and yields an error.
pub struct JournalIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> JournalIterator<'a> {
    /// Starts reading at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: MutexGuard<'a, Box<dyn StorageBackend>>, offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset,
            finished: false,
        })
    }

    /// Offset just past the last complete record returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Whether a torn tail follows the last complete record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.finished && self.offset < self.total_size
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, JournalRecord)>> {
        let start = self.offset;
        let remaining = self.total_size.saturating_sub(start);
        if remaining < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let record_type = RecordType::from_byte(header[6]).ok_or_else(|| {
            CoreError::journal_corruption(format!(
                "unknown record type {} at offset {start}",
                header[6]
            ))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if remaining < total_len as u64 {
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let computed = compute_crc32(&covered);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let record = JournalRecord::decode_payload(record_type, payload)?;
        self.offset += total_len as u64;
        Ok(Some((start, record)))
    }
}

impl Iterator for JournalIterator<'_> {
    type Item = CoreResult<(u64, JournalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
