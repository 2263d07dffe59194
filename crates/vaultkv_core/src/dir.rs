//! Store directory management.
//!
//! A persistent ledger lives in its own directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! └─ ledger.log    # Framed append-only row log
//! ```

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LEDGER_FILE: &str = "ledger.log";

/// Holds the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time; a second open
/// from any process fails with [`StoreError::StoreLocked`].
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and acquires its lock.
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StoreError::malformed(format!(
                "store path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the ledger log file.
    pub(crate) fn ledger_path(&self) -> PathBuf {
        self.path.join(LEDGER_FILE)
    }

    /// Releases the lock and deletes the whole directory.
    pub(crate) fn remove(self) -> StoreResult<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_dir_all(&path)?;
        Ok(())
    }
}
