//! The lock table.

use super::{HolderId, LockMode, ResourceId};
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hands out reentrant READ/WRITE locks keyed by resource.
///
/// Each resource gets its own mutex and condition variable, created on first
/// use and dropped once no holder or waiter references it. The table mutex is
/// only held long enough to look an entry up, so unrelated resources never
/// contend.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<HashMap<ResourceId, Arc<ResourceLock>>>,
    default_timeout: Duration,
}

#[derive(Debug, Default)]
struct ResourceLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct LockState {
    /// Reentrant read counts per holder.
    readers: HashMap<HolderId, u32>,
    /// Current writer and its reentrant count.
    writer: Option<(HolderId, u32)>,
    /// Writers blocked on this resource; new readers queue behind them.
    waiting_writers: usize,
}

impl LockState {
    fn holds_any(&self, holder: HolderId) -> bool {
        self.readers.contains_key(&holder) || self.writer.is_some_and(|(w, _)| w == holder)
    }

    fn can_grant(&self, holder: HolderId, mode: LockMode) -> bool {
        let foreign_writer = self.writer.is_some_and(|(w, _)| w != holder);
        match mode {
            LockMode::Read => {
                !foreign_writer && (self.waiting_writers == 0 || self.holds_any(holder))
            }
            LockMode::Write => {
                !foreign_writer && self.readers.keys().all(|reader| *reader == holder)
            }
        }
    }

    fn grant(&mut self, holder: HolderId, mode: LockMode) {
        match mode {
            LockMode::Read => *self.readers.entry(holder).or_insert(0) += 1,
            LockMode::Write => match &mut self.writer {
                Some((_, count)) => *count += 1,
                None => self.writer = Some((holder, 1)),
            },
        }
    }

    fn is_idle(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none() && self.waiting_writers == 0
    }
}

impl LockManager {
    /// Creates a lock manager whose `acquire` waits at most `default_timeout`.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// The wait budget used by [`LockManager::acquire`].
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Acquires `mode` on `resource` for `holder`, blocking up to the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` (transient) if the lock is not granted in time.
    pub fn acquire(&self, resource: &ResourceId, mode: LockMode, holder: HolderId) -> CoreResult<()> {
        self.acquire_within(resource, mode, holder, self.default_timeout)
    }

    /// Acquires `mode` on `resource`, blocking up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` (transient) if the lock is not granted in time.
    pub fn acquire_within(
        &self,
        resource: &ResourceId,
        mode: LockMode,
        holder: HolderId,
        timeout: Duration,
    ) -> CoreResult<()> {
        let entry = self.entry(resource);
        let deadline = Instant::now() + timeout;
        let mut state = entry.state.lock();

        if !state.can_grant(holder, mode) {
            if mode == LockMode::Write {
                state.waiting_writers += 1;
            }
            let mut timed_out = false;
            while !state.can_grant(holder, mode) {
                if entry.changed.wait_until(&mut state, deadline).timed_out()
                    && !state.can_grant(holder, mode)
                {
                    timed_out = true;
                    break;
                }
            }
            if mode == LockMode::Write {
                state.waiting_writers -= 1;
                // Readers queued behind this writer may proceed now.
                entry.changed.notify_all();
            }
            if timed_out {
                drop(state);
                self.discard_if_idle(resource, &entry);
                return Err(CoreError::lock_timeout(resource.to_string(), timeout));
            }
        }

        state.grant(holder, mode);
        Ok(())
    }

    /// Releases one acquisition of `mode` on `resource` held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns `LockFailure` if `holder` does not hold `mode` on `resource`.
    pub fn release(&self, resource: &ResourceId, mode: LockMode, holder: HolderId) -> CoreResult<()> {
        let entry = self
            .table
            .lock()
            .get(resource)
            .cloned()
            .ok_or_else(|| not_held(resource, mode, holder))?;

        {
            let mut state = entry.state.lock();
            match mode {
                LockMode::Read => {
                    let count = state
                        .readers
                        .get_mut(&holder)
                        .ok_or_else(|| not_held(resource, mode, holder))?;
                    *count -= 1;
                    if *count == 0 {
                        state.readers.remove(&holder);
                    }
                }
                LockMode::Write => match &mut state.writer {
                    Some((owner, count)) if *owner == holder => {
                        *count -= 1;
                        if *count == 0 {
                            state.writer = None;
                        }
                    }
                    _ => return Err(not_held(resource, mode, holder)),
                },
            }
            entry.changed.notify_all();
        }

        self.discard_if_idle(resource, &entry);
        Ok(())
    }

    /// The strongest mode `holder` currently has on `resource`.
    #[must_use]
    pub fn held_mode(&self, resource: &ResourceId, holder: HolderId) -> Option<LockMode> {
        let entry = self.table.lock().get(resource).cloned()?;
        let state = entry.state.lock();
        if state.writer.is_some_and(|(w, _)| w == holder) {
            Some(LockMode::Write)
        } else if state.readers.contains_key(&holder) {
            Some(LockMode::Read)
        } else {
            None
        }
    }

    /// Whether anyone holds a lock on `resource`.
    #[must_use]
    pub fn is_locked(&self, resource: &ResourceId) -> bool {
        self.table
            .lock()
            .get(resource)
            .is_some_and(|entry| !entry.state.lock().is_idle())
    }

    /// Number of resources with a live lock entry.
    #[must_use]
    pub fn active_resources(&self) -> usize {
        self.table.lock().len()
    }

    fn entry(&self, resource: &ResourceId) -> Arc<ResourceLock> {
        Arc::clone(self.table.lock().entry(resource.clone()).or_default())
    }

    /// Drops the table entry when nobody holds, waits on, or references it.
    fn discard_if_idle(&self, resource: &ResourceId, entry: &Arc<ResourceLock>) {
        let mut table = self.table.lock();
        // Table plus our own clone; any other reference is a pending acquirer.
        if Arc::strong_count(entry) == 2 && entry.state.lock().is_idle() {
            table.remove(resource);
        }
    }
}

fn not_held(resource: &ResourceId, mode: LockMode, holder: HolderId) -> CoreError {
    CoreError::lock_failure(
        resource.to_string(),
        format!("{holder} released {mode} without holding it"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::thread;

    const A: HolderId = HolderId(1);
    const B: HolderId = HolderId(2);

    fn create_manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_secs(5)))
    }

    fn coll() -> ResourceId {
        ResourceId::collection("/db/test")
    }

    #[test]
    fn readers_share() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Read, A).unwrap();
        locks
            .acquire_within(&coll(), LockMode::Read, B, Duration::from_millis(10))
            .unwrap();
        locks.release(&coll(), LockMode::Read, A).unwrap();
        locks.release(&coll(), LockMode::Read, B).unwrap();
        assert_eq!(locks.active_resources(), 0);
    }

    #[test]
    fn reader_blocks_writer_until_release() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Read, A).unwrap();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks.acquire(&coll(), LockMode::Write, B).unwrap();
                tx.send(()).unwrap();
                locks.release(&coll(), LockMode::Write, B).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        locks.release(&coll(), LockMode::Read, A).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn writer_blocks_reader() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Write, A).unwrap();
        let err = locks
            .acquire_within(&coll(), LockMode::Read, B, Duration::from_millis(30))
            .unwrap_err();
        assert!(err.is_transient());
        locks.release(&coll(), LockMode::Write, A).unwrap();
        locks
            .acquire_within(&coll(), LockMode::Read, B, Duration::from_millis(30))
            .unwrap();
    }

    #[test]
    fn writer_may_read_reentrantly() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Write, A).unwrap();
        locks.acquire(&coll(), LockMode::Read, A).unwrap();
        locks.release(&coll(), LockMode::Read, A).unwrap();
        assert_eq!(locks.held_mode(&coll(), A), Some(LockMode::Write));
        locks.release(&coll(), LockMode::Write, A).unwrap();
        assert_eq!(locks.held_mode(&coll(), A), None);
    }

    #[test]
    fn sole_reader_upgrades() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Read, A).unwrap();
        locks
            .acquire_within(&coll(), LockMode::Write, A, Duration::from_millis(10))
            .unwrap();
        locks.release(&coll(), LockMode::Write, A).unwrap();
        locks.release(&coll(), LockMode::Read, A).unwrap();
        assert!(!locks.is_locked(&coll()));
    }

    #[test]
    fn shared_upgrade_times_out() {
        let locks = create_manager();
        locks.acquire(&coll(), LockMode::Read, A).unwrap();
        locks.acquire(&coll(), LockMode::Read, B).unwrap();
        assert!(locks
            .acquire_within(&coll(), LockMode::Write, A, Duration::from_millis(20))
            .is_err());
        // The failed upgrade left no waiting writer behind.
        locks
            .acquire_within(&coll(), LockMode::Read, HolderId(3), Duration::from_millis(20))
            .unwrap();
    }

    #[test]
    fn release_without_acquire_fails() {
        let locks = create_manager();
        assert!(matches!(
            locks.release(&coll(), LockMode::Read, A),
            Err(CoreError::LockFailure { timed_out: false, .. })
        ));
        locks.acquire(&coll(), LockMode::Read, A).unwrap();
        assert!(locks.release(&coll(), LockMode::Write, A).is_err());
        assert!(locks.release(&coll(), LockMode::Read, B).is_err());
        locks.release(&coll(), LockMode::Read, A).unwrap();
    }

    #[test]
    fn distinct_resources_are_independent() {
        let locks = create_manager();
        let doc = ResourceId::Document(crate::types::DocumentId::new(9));
        locks.acquire(&coll(), LockMode::Write, A).unwrap();
        locks
            .acquire_within(&doc, LockMode::Write, B, Duration::from_millis(10))
            .unwrap();
        assert_eq!(locks.active_resources(), 2);
    }

    proptest! {
        #[test]
        fn reentrant_counts_balance(reads in 1u32..8, writes in 1u32..8) {
            let locks = LockManager::new(Duration::from_millis(10));
            for _ in 0..writes {
                locks.acquire(&coll(), LockMode::Write, A).unwrap();
            }
            for _ in 0..reads {
                locks.acquire(&coll(), LockMode::Read, A).unwrap();
            }
            for _ in 0..reads {
                locks.release(&coll(), LockMode::Read, A).unwrap();
            }
            for i in 0..writes {
                prop_assert!(locks.acquire_within(&coll(), LockMode::Read, B, Duration::from_millis(1)).is_err());
                locks.release(&coll(), LockMode::Write, A).unwrap();
                prop_assert_eq!(locks.is_locked(&coll()), i + 1 < writes);
            }
            prop_assert!(locks.release(&coll(), LockMode::Write, A).is_err());
        }
    }
}
