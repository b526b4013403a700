//! The storage backend trait.

use crate::error::StorageResult;

/// A low-level byte store used for the journal and the tree snapshot.
///
/// Implementations never interpret the bytes they hold.
///
/// # Invariants
///
/// - `append` returns the offset at which the data starts
/// - `read_at` returns exactly what was appended at that offset
/// - after `sync` returns, every appended byte survives a process kill
/// - `truncate` never grows the store
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] when the range is not
    /// fully inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. A failed append may leave a
    /// partial tail behind; callers that care must truncate it away.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current size in bytes; also the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata onto stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shrinks the store to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// underlying truncate fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
