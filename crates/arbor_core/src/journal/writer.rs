//! Journal writer.

use crate::error::{CoreError, CoreResult};
use crate::journal::iterator::JournalIterator;
use crate::journal::record::JournalRecord;
use arbor_storage::StorageBackend;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Append-only journal over a storage backend.
///
/// Appends are serialized by one mutex, so records from concurrent
/// transactions interleave but never overlap. A failed append cuts its
/// partial bytes off again; if even that fails the journal is poisoned and
/// refuses every further append, so no later record can land behind garbage.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    poisoned: AtomicBool,
}

impl Journal {
    /// Creates a journal over `backend`, keeping whatever it already holds.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Appends a record and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns `TransactionLog` if the journal is poisoned or the write
    /// fails, and `Encoding` if the record cannot be serialized.
    pub fn append(&self, record: &JournalRecord) -> CoreResult<u64> {
        let data = record.encode()?;
        let mut backend = self.backend.lock();
        if self.is_poisoned() {
            return Err(CoreError::transaction_log(
                "journal is poisoned by an earlier write failure",
            ));
        }

        let start = backend.size()?;
        match backend.append(&data) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(cut) = backend.truncate(start) {
                    self.poisoned.store(true, Ordering::SeqCst);
                    error!(error = %cut, offset = start, "could not cut torn journal record, journal poisoned");
                } else {
                    error!(error = %e, offset = start, "journal append failed");
                }
                Err(CoreError::transaction_log(format!("append failed: {e}")))
            }
        }
    }

    /// Pushes buffered records to the OS; with `force`, onto stable storage.
    ///
    /// # Errors
    ///
    /// Returns `TransactionLog` if the flush or sync fails.
    pub fn flush(&self, force: bool) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        let result = backend.flush().and_then(|()| {
            if force {
                backend.sync()
            } else {
                Ok(())
            }
        });
        result.map_err(|e| {
            error!(error = %e, force, "journal flush failed");
            CoreError::transaction_log(format!("flush failed: {e}"))
        })
    }

    /// Current size; also the offset of the next record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Whether an unrecoverable write failure has disabled appends.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Streams records starting at `offset`. Holds the journal lock until
    /// the iterator is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter_from(&self, offset: u64) -> CoreResult<JournalIterator<'_>> {
        JournalIterator::new(self.backend.lock(), offset)
    }

    /// Streams every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<JournalIterator<'_>> {
        self.iter_from(0)
    }

    /// Reads every record into memory.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or I/O error.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, JournalRecord)>> {
        self.iter()?.collect()
    }

    /// Cuts the journal back to `offset` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    /// Empties the journal and lifts a poisoning, since no garbage remains.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses.
    pub fn clear(&self) -> CoreResult<()> {
        self.truncate(0)?;
        self.poisoned.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, TransactionId};
    use arbor_storage::{InMemoryBackend, StorageError, StorageResult};

    fn create_journal() -> (InMemoryBackend, Journal) {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()));
        (backend, journal)
    }

    /// Writes half of every append, then fails; truncation may fail too.
    struct TornBackend {
        inner: InMemoryBackend,
        fail_truncate: bool,
    }

    impl StorageBackend for TornBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(&data[..data.len() / 2])?;
            Err(StorageError::Unavailable("disk full".into()))
        }
        fn flush(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn sync(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.fail_truncate {
                return Err(StorageError::Unavailable("read-only".into()));
            }
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn append_returns_offsets() {
        let (_backend, journal) = create_journal();
        let first = journal
            .append(&JournalRecord::Begin {
                txid: TransactionId::new(1),
            })
            .unwrap();
        let second = journal
            .append(&JournalRecord::Commit {
                txid: TransactionId::new(1),
                sequence: SequenceNumber::new(1),
            })
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 23);
        assert_eq!(journal.read_all().unwrap().len(), 2);
        journal.flush(true).unwrap();
    }

    #[test]
    fn torn_append_is_cut_away() {
        let inner = InMemoryBackend::new();
        let journal = Journal::new(Box::new(TornBackend {
            inner: inner.clone(),
            fail_truncate: false,
        }));
        let err = journal
            .append(&JournalRecord::Begin {
                txid: TransactionId::new(1),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::TransactionLog { .. }));
        assert_eq!(inner.size().unwrap(), 0);
        assert!(!journal.is_poisoned());
    }

    #[test]
    fn failed_cut_poisons_journal() {
        let journal = Journal::new(Box::new(TornBackend {
            inner: InMemoryBackend::new(),
            fail_truncate: true,
        }));
        let record = JournalRecord::Abort {
            txid: TransactionId::new(2),
        };
        assert!(journal.append(&record).is_err());
        assert!(journal.is_poisoned());
        let err = journal.append(&record).unwrap_err();
        assert!(err.to_string().contains("poisoned"));
    }

    #[test]
    fn clear_empties() {
        let (backend, journal) = create_journal();
        journal
            .append(&JournalRecord::Begin {
                txid: TransactionId::new(1),
            })
            .unwrap();
        journal.clear().unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(journal.read_all().unwrap().is_empty());
    }
}
