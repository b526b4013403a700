//! The transaction journal.
//!
//! Every mutation is appended here before it touches the tree. On startup
//! the journal is replayed on top of the last snapshot to rebuild the state
//! the process had when it stopped.
//!
//! ## Record format
//!
//! ```text
//! | magic "AJNL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Entry payloads are CBOR-encoded [`LogEntry`] values holding before and
//! after images.
//!
//! ## Recovery policy
//!
//! Tolerated, treated as end of journal:
//!
//! - a header shorter than 11 bytes at the end
//! - a payload running past the end
//!
//! Both are writes that never completed. The incomplete bytes are cut off
//! and any transaction whose commit marker was lost is rolled back.
//!
//! Fatal, opening fails:
//!
//! - CRC mismatch (`ChecksumMismatch`)
//! - invalid magic, unknown record type, future version (`JournalCorruption`)
//!
//! No heuristic repair is attempted.

mod iterator;
mod record;
mod recovery;
mod writer;

pub use iterator::JournalIterator;
pub use record::{
    compute_crc32, JournalRecord, LogEntry, RecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
pub use recovery::{recover, RecoveryReport};
pub use writer::Journal;
