//! Advisory locks on the `.lock` sidecar files of dtable's on-disk state.
//!
//! Two kinds of state are guarded:
//!
//! - a file catalog (`<catalog>.lock`): every catalog transaction holds it
//!   exclusively from `begin` until commit or drop;
//! - a filesystem table directory (`<dir>/.lock`): segment rewrites and
//!   `save_as` destinations hold it exclusively, segment readers hold it
//!   shared for the duration of one segment read.
//!
//! Locks are process-level (`flock(2)` on Unix) and released on drop.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;
use tracing::trace;

use crate::error::StorageError;

/// How a [`FileLock`] is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers of a table directory.
    Shared,
    /// One writer of a table directory, or one catalog transaction.
    Exclusive,
}

/// A held advisory lock. Dropping it closes the descriptor and releases
/// the lock.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    mode: LockMode,
}

impl FileLock {
    /// Wait for `mode` on the sidecar at `path`, creating it if missing.
    pub fn acquire(path: &Path, mode: LockMode) -> Result<Self, StorageError> {
        let file = open_sidecar(path)?;
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        trace!(path = %path.display(), ?mode, "lock acquired");
        Ok(Self { _file: file, mode })
    }

    /// Take `mode` without waiting. Contention is `FileLocked`; other
    /// failures surface as I/O errors.
    pub fn try_acquire(path: &Path, mode: LockMode) -> Result<Self, StorageError> {
        let file = open_sidecar(path)?;
        let taken = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match taken {
            Ok(()) => Ok(Self { _file: file, mode }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(StorageError::FileLocked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exclusive(path: &Path) -> Result<Self, StorageError> {
        Self::acquire(path, LockMode::Exclusive)
    }

    pub fn shared(path: &Path) -> Result<Self, StorageError> {
        Self::acquire(path, LockMode::Shared)
    }

    pub fn try_exclusive(path: &Path) -> Result<Self, StorageError> {
        Self::try_acquire(path, LockMode::Exclusive)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

fn open_sidecar(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}
