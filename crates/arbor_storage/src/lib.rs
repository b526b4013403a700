//! # Arbor Storage
//!
//! Byte-store backends underneath the Arbor transaction journal and tree
//! snapshot.
//!
//! A backend is an **opaque, append-oriented byte store**. It knows nothing
//! about journal records, checkpoints or collections; `arbor_core` owns every
//! format decision.
//!
//! ## Contract
//!
//! - `append` returns the offset the bytes were written at
//! - `flush` hands buffered bytes to the operating system
//! - `sync` forces them (and file metadata) onto stable storage
//! - `truncate` only ever shrinks
//! - Backends are `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-memory buffer; clones see the same bytes,
//!   which lets tests "restart" a pool on the data a previous one left behind
//! - [`FileBackend`] - a single OS file
//!
//! ## Example
//!
//! ```rust
//! use arbor_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut journal = InMemoryBackend::new();
//! let survivor = journal.clone();
//! journal.append(b"BEGIN").unwrap();
//! assert_eq!(survivor.read_at(0, 5).unwrap(), b"BEGIN");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
