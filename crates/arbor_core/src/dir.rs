//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK            # Advisory lock, one pool per directory
//! ├─ journal.log     # Transaction journal
//! └─ tree.snapshot   # Tree image written at checkpoints
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock file name.
pub const LOCK_FILE: &str = "LOCK";
/// Journal file name.
pub const JOURNAL_FILE: &str = "journal.log";
/// Tree snapshot file name.
pub const SNAPSHOT_FILE: &str = "tree.snapshot";

/// A database directory held under an exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the directory is missing and
    /// `create_if_missing` is false or the path is not a directory,
    /// `DatabaseLocked` if another process holds it, or an I/O error.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Whether neither a journal nor a snapshot exists yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.journal_path().exists() && !self.snapshot_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");
        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert!(dir.is_new_database());
        assert_eq!(dir.journal_path(), db_path.join("journal.log"));
        assert_eq!(dir.snapshot_path(), db_path.join("tree.snapshot"));
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        assert!(DatabaseDir::open(&temp.path().join("missing"), false).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");
        let first = DatabaseDir::open(&db_path, true).unwrap();
        assert!(matches!(
            DatabaseDir::open(&db_path, true),
            Err(CoreError::DatabaseLocked)
        ));
        drop(first);
        DatabaseDir::open(&db_path, true).unwrap();
    }
}
