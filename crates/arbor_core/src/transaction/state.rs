//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::journal::LogEntry;
use crate::transaction::manager::TransactionManager;
use crate::types::TransactionId;
use std::sync::Arc;
use tracing::warn;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting mutations.
    Active,
    /// Commit marker written.
    Committed,
    /// Rolled back.
    Aborted,
}

/// How far a commit pushes the journal before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Handed to the OS; lost on power failure until the next forced flush.
    Buffered,
    /// Synced to stable storage.
    Forced,
}

/// A transaction handle returned by [`TransactionManager::begin`].
///
/// Dropping a handle that is still active aborts it.
pub struct Txn {
    id: TransactionId,
    state: TransactionState,
    entries: Vec<LogEntry>,
    manager: Arc<TransactionManager>,
}

impl Txn {
    pub(crate) fn new(id: TransactionId, manager: Arc<TransactionManager>) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            entries: Vec::new(),
            manager,
        }
    }

    /// Transaction id, as tagged on its journal records.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether the transaction still accepts mutations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Mutations applied so far, in order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn take_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }

    /// Fails with `IllegalState` unless the transaction is active.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::illegal_state(format!(
                "transaction {} already committed",
                self.id
            ))),
            TransactionState::Aborted => Err(CoreError::illegal_state(format!(
                "transaction {} already aborted",
                self.id
            ))),
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(txid = %self.id, "active transaction dropped, aborting");
            let manager = Arc::clone(&self.manager);
            if let Err(e) = manager.abort(self) {
                warn!(txid = %self.id, error = %e, "abort on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
