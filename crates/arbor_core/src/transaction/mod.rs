//! Transactions over the journal.
//!
//! A transaction moves from `Active` to exactly one of `Committed` or
//! `Aborted`. Mutations are logged before they are applied, so a crash at
//! any point leaves a journal from which recovery reaches a consistent tree.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Durability, TransactionState, Txn};
