//! Crash simulation for the journal and snapshot stores.
//!
//! [`CrashableBackend`] wraps an in-memory store and remembers how much of it
//! was synced. A simulated kill keeps only those bytes, so a commit that was
//! merely buffered is lost exactly as it would be on power failure. Writes and
//! syncs can also be made to fail on demand.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbor_testkit::crash::CrashableBackend;
//!
//! let (backend, control) = CrashableBackend::new();
//! // hand `backend` to a pool, work, then:
//! let survivor = control.durable_image();
//! ```

use arbor_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    synced_len: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
    fail_on_truncate: AtomicBool,
}

impl Default for CrashState {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            synced_len: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
            fail_on_truncate: AtomicBool::new(false),
        }
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

/// A storage backend that can simulate crashes.
#[derive(Debug)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

/// Remote control for a [`CrashableBackend`] that was moved into a pool.
#[derive(Debug, Clone)]
pub struct CrashControl {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates an empty backend and its control.
    pub fn new() -> (Self, CrashControl) {
        Self::with_data(Vec::new())
    }

    /// Creates a backend holding `data`, all of it counted as synced.
    pub fn with_data(data: Vec<u8>) -> (Self, CrashControl) {
        let inner = InMemoryBackend::with_data(data);
        let state = Arc::new(CrashState::default());
        let len = inner.size().unwrap_or(0);
        state.synced_len.store(len, Ordering::SeqCst);
        let control = CrashControl {
            inner: inner.clone(),
            state: Arc::clone(&state),
        };
        (Self { inner, state }, control)
    }
}

impl CrashControl {
    /// Makes appends fail once `bytes` more bytes have been written. The
    /// append crossing the limit writes its first part only.
    pub fn crash_after(&self, bytes: usize) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Makes `truncate` fail.
    pub fn set_fail_on_truncate(&self, fail: bool) {
        self.state.fail_on_truncate.store(fail, Ordering::SeqCst);
    }

    /// Clears every failure switch.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
        self.state.fail_on_truncate.store(false, Ordering::SeqCst);
    }

    /// Whether a simulated failure has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Everything written so far, synced or not.
    pub fn full_image(&self) -> Vec<u8> {
        self.inner.data()
    }

    /// What survives a power failure: the bytes up to the last sync.
    pub fn durable_image(&self) -> Vec<u8> {
        let mut data = self.inner.data();
        let synced = usize::try_from(self.state.synced_len.load(Ordering::SeqCst))
            .unwrap_or(usize::MAX);
        data.truncate(synced);
        data
    }

    /// Bytes up to the last sync.
    pub fn synced_len(&self) -> u64 {
        self.state.synced_len.load(Ordering::SeqCst)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let current = self.state.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("write"));
        }
        if current + bytes.len() > threshold {
            self.state.crashed.store(true, Ordering::SeqCst);
            let partial_len = threshold - current;
            if partial_len > 0 {
                self.inner.append(&bytes[..partial_len])?;
            }
            return Err(simulated("partial write"));
        }
        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.state.fail_on_truncate.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("truncate"));
        }
        self.inner.truncate(new_size)?;
        self.state.synced_len.fetch_min(new_size, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()?;
        let len = self.inner.size()?;
        self.state.synced_len.store(len, Ordering::SeqCst);
        Ok(())
    }
}
