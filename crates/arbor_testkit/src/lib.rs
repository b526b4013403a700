//! # Arbor Testkit
//!
//! Test utilities for Arbor.
//!
//! This crate provides:
//! - Pool fixtures over memory or a temporary directory, with restart
//! - A storage backend that simulates crashes and I/O failures
//! - Sample documents and index configurations
//! - Property-based test generators using proptest
//!
//! The end-to-end scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbor_testkit::prelude::*;
//!
//! #[test]
//! fn survives_restart() {
//!     let mut db = TestPool::memory();
//!     let broker = db.admin();
//!     store(&broker, "/db/books", "a.xml", BOOK);
//!     drop(broker);
//!     db.crash_and_restart();
//!     assert!(db.pool.tree().contains("/db/books"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
