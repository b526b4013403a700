//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalRecord, LogEntry, RecoveryReport};
use crate::transaction::state::{Durability, TransactionState, Txn};
use crate::tree::{SnapshotStore, TreeStore};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Coordinates begin, commit and abort over the journal and the tree.
///
/// Every mutation goes through [`TransactionManager::apply`], which appends
/// the entry to the journal before installing it in the tree. Abort reverses
/// the applied entries in memory and then records an abort marker.
///
/// A checkpoint takes the gate exclusively, so the snapshot it writes and
/// the active set it records describe the same moment.
pub struct TransactionManager {
    journal: Arc<Journal>,
    tree: Arc<TreeStore>,
    snapshots: SnapshotStore,
    next_txid: AtomicU64,
    next_seq: AtomicU64,
    committed_seq: AtomicU64,
    /// Active transactions and the offset of their BEGIN record.
    active: Mutex<BTreeMap<TransactionId, u64>>,
    gate: RwLock<()>,
    sync_on_commit: bool,
    max_journal_size: u64,
    interrupted: AtomicBool,
    closed: AtomicBool,
}

impl TransactionManager {
    /// Creates a manager continuing where `recovery` left off.
    pub fn new(
        journal: Arc<Journal>,
        tree: Arc<TreeStore>,
        snapshots: SnapshotStore,
        config: &Config,
        recovery: &RecoveryReport,
    ) -> Self {
        Self {
            journal,
            tree,
            snapshots,
            next_txid: AtomicU64::new(recovery.next_txid.max(1)),
            next_seq: AtomicU64::new(recovery.next_sequence.max(1)),
            committed_seq: AtomicU64::new(recovery.next_sequence.saturating_sub(1)),
            active: Mutex::new(BTreeMap::new()),
            gate: RwLock::new(()),
            sync_on_commit: config.sync_on_commit,
            max_journal_size: config.max_journal_size,
            interrupted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The tree this manager mutates.
    #[must_use]
    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.tree
    }

    /// The journal this manager appends to.
    #[must_use]
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after shutdown and `TransactionLog` if the
    /// BEGIN record cannot be written.
    pub fn begin(self: &Arc<Self>) -> CoreResult<Txn> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::DatabaseClosed);
        }
        let _gate = self.gate.read();
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let offset = self.journal.append(&JournalRecord::Begin { txid })?;
        self.active.lock().insert(txid, offset);
        debug!(%txid, offset, "transaction started");
        Ok(Txn::new(txid, Arc::clone(self)))
    }

    /// Logs `entry` under `txn`, then installs it in the tree.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if `txn` is not active or the manager was
    /// interrupted, the error from [`TreeStore::check`] if the entry does
    /// not fit the tree, and `TransactionLog` if the append fails. A failed
    /// append or an interruption aborts `txn`.
    pub fn apply(&self, txn: &mut Txn, entry: LogEntry) -> CoreResult<()> {
        txn.ensure_active()?;
        if self.is_interrupted() {
            self.abort_after_failure(txn);
            return Err(CoreError::illegal_state(format!(
                "transaction {} interrupted by shutdown",
                txn.id()
            )));
        }
        self.tree.check(&entry)?;

        let result = {
            let _gate = self.gate.read();
            self.journal
                .append(&JournalRecord::Entry {
                    txid: txn.id(),
                    entry: entry.clone(),
                })
                .and_then(|_| self.tree.redo(&entry))
        };
        match result {
            Ok(()) => {
                debug!(txid = %txn.id(), change = %entry.describe(), "applied");
                txn.push(entry);
                Ok(())
            }
            Err(e) => {
                // The entry may be in memory already; undo covers it.
                txn.push(entry);
                self.abort_after_failure(txn);
                Err(match e {
                    CoreError::TransactionLog { .. } => e,
                    other => CoreError::transaction_log(format!(
                        "transaction {} aborted: {other}",
                        txn.id()
                    )),
                })
            }
        }
    }

    /// Commits with the configured durability.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit_with`].
    pub fn commit(&self, txn: &mut Txn) -> CoreResult<SequenceNumber> {
        let durability = if self.sync_on_commit {
            Durability::Forced
        } else {
            Durability::Buffered
        };
        self.commit_with(txn, durability)
    }

    /// Writes the commit marker and flushes the journal. With
    /// [`Durability::Forced`] every record of `txn` is on stable storage when
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if `txn` is not active, or if the manager was
    /// interrupted or closed, and `TransactionLog` if the marker cannot be
    /// written or flushed. Apart from the inactive case, `txn` is aborted.
    pub fn commit_with(&self, txn: &mut Txn, durability: Durability) -> CoreResult<SequenceNumber> {
        txn.ensure_active()?;
        let txid = txn.id();
        if self.is_interrupted() || self.closed.load(Ordering::SeqCst) {
            self.abort_after_failure(txn);
            return Err(CoreError::illegal_state(format!(
                "transaction {txid} cannot commit after shutdown"
            )));
        }

        let result = {
            let _gate = self.gate.read();
            let sequence = SequenceNumber::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
            self.journal
                .append(&JournalRecord::Commit { txid, sequence })
                .and_then(|_| self.journal.flush(durability == Durability::Forced))
                .map(|()| {
                    self.committed_seq
                        .fetch_max(sequence.as_u64(), Ordering::SeqCst);
                    self.active.lock().remove(&txid);
                    sequence
                })
        };

        match result {
            Ok(sequence) => {
                txn.mark_committed();
                txn.take_entries();
                debug!(%txid, %sequence, ?durability, "transaction committed");
                self.checkpoint_if_needed();
                Ok(sequence)
            }
            Err(e) => {
                self.abort_after_failure(txn);
                Err(e)
            }
        }
    }

    /// Rolls `txn` back: its entries are undone in reverse order, then an
    /// abort marker is appended. Aborting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` for a committed transaction, the first undo
    /// error, or `TransactionLog` if the marker cannot be written. The
    /// transaction ends up aborted in every case but the first.
    pub fn abort(&self, txn: &mut Txn) -> CoreResult<()> {
        match txn.ensure_active() {
            Ok(()) => {}
            Err(_) if txn.state() == TransactionState::Aborted => {
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        let txid = txn.id();
        let entries = txn.take_entries();
        txn.mark_aborted();

        let _gate = self.gate.read();
        let mut first_error = None;
        for entry in entries.iter().rev() {
            if let Err(e) = self.tree.undo(entry) {
                error!(%txid, change = %entry.describe(), error = %e, "undo failed");
                first_error.get_or_insert(e);
            }
        }
        let logged = self.journal.append(&JournalRecord::Abort { txid });
        self.active.lock().remove(&txid);
        debug!(%txid, undone = entries.len(), "transaction aborted");

        match (first_error, logged) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(_)) => Ok(()),
        }
    }

    fn abort_after_failure(&self, txn: &mut Txn) {
        if let Err(e) = self.abort(txn) {
            error!(txid = %txn.id(), error = %e, "abort after failure did not complete");
        }
    }

    /// Flushes the journal; with `force`, onto stable storage.
    ///
    /// # Errors
    ///
    /// Returns `TransactionLog` if the flush fails.
    pub fn flush_to_log(&self, force: bool) -> CoreResult<()> {
        self.journal.flush(force)
    }

    /// Writes a snapshot of the tree followed by a checkpoint marker.
    ///
    /// With no transaction active the journal is emptied first. Otherwise
    /// the marker tells recovery to start at the oldest active BEGIN.
    ///
    /// # Errors
    ///
    /// Returns the snapshot or journal error; the previous checkpoint stays
    /// valid.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        let _gate = self.gate.write();
        let sequence = self.committed_seq();
        self.snapshots.save(&self.tree.snapshot())?;

        let oldest = self.active.lock().values().min().copied();
        let scan_from = match oldest {
            Some(offset) => offset,
            None => {
                self.journal.clear()?;
                0
            }
        };
        self.journal.append(&JournalRecord::Checkpoint {
            sequence,
            scan_from,
        })?;
        self.journal.flush(true)?;
        info!(%sequence, scan_from, "checkpoint written");
        Ok(sequence)
    }

    fn checkpoint_if_needed(&self) {
        if self.max_journal_size == 0 {
            return;
        }
        match self.journal.size() {
            Ok(size) if size > self.max_journal_size => {
                if let Err(e) = self.checkpoint() {
                    warn!(error = %e, size, "automatic checkpoint failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read journal size"),
        }
    }

    /// Makes every active transaction fail at its next operation.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Whether [`TransactionManager::interrupt`] was called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Refuses new transactions from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Highest committed sequence.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
