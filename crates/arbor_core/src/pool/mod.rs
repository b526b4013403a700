//! Broker pool and brokers.
//!
//! A [`BrokerPool`] owns one database instance: the tree, the journal, the
//! transaction manager and the lock manager. Callers check a [`Broker`] out,
//! do their work through it, and check it back in (or drop it).
//!
//! ```text
//! checkout(subject) ──► Broker ──► open_collection / open_document ──► handle
//!                         │                                              │
//!                         └── begin / commit / abort                     └── release (or drop)
//! ```
//!
//! Checkout must happen before any lock is taken. Locks still held when a
//! broker goes back to the pool are logged and force-released.

mod broker;
mod broker_pool;
mod handle;
mod registry;

pub use broker::Broker;
pub use broker_pool::{BrokerPool, PoolStats};
pub use handle::{CollectionHandle, DocumentHandle, IndexInfo};
pub use registry::PoolRegistry;
