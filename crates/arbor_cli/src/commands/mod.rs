//! CLI command implementations.

pub mod check_index;
pub mod dump_log;
pub mod inspect;
pub mod recover;

use arbor_core::journal::recover;
use arbor_core::tree::{SnapshotStore, TreeStore};
use arbor_core::{Journal, RecoveryReport, JOURNAL_FILE, SNAPSHOT_FILE};
use arbor_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;

/// Rebuilds the tree from the snapshot and a private copy of the journal,
/// so nothing on disk is touched.
pub fn load_view(path: &Path, default_depth: u32) -> Result<(TreeStore, RecoveryReport), Box<dyn std::error::Error>> {
    let journal_path = path.join(JOURNAL_FILE);
    let snapshot_path = path.join(SNAPSHOT_FILE);
    if !journal_path.exists() && !snapshot_path.exists() {
        return Err(format!("No database found at {}", path.display()).into());
    }

    let tree = match SnapshotStore::file(snapshot_path).load()? {
        Some(image) => TreeStore::restore(image, default_depth)?,
        None => TreeStore::new(default_depth),
    };
    let mut bytes = Vec::new();
    if journal_path.exists() {
        let backend = FileBackend::open(&journal_path)?;
        let size = backend.size()?;
        if size > 0 {
            bytes = backend.read_at(0, usize::try_from(size)?)?;
        }
    }
    let journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)));
    let report = recover(&journal, &tree)?;
    Ok((tree, report))
}

/// Formats a byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
