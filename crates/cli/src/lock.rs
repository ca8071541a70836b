//! Process-wide run lock.
//!
//! An exclusive, non-blocking `flock` on a lock file (via `fs2`) keeps two
//! runs from working the same source directory. The guard releases the lock
//! and removes the file when dropped.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock is held by another process: {0}")]
    Held(PathBuf),

    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to acquire lock: {0}")]
    Acquire(#[source] io::Error),

    #[error("lock file was removed while locking: {0}")]
    Stale(PathBuf),
}

const MAX_STALE_RETRIES: usize = 3;

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// True when `file` is still the file found at `path`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[derive(Debug)]
pub struct RunLock {
    file: Option<File>,
    path: PathBuf,
}

impl RunLock {
    /// Tries to take the lock without waiting. The holder's PID is written
    /// into the file.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let mut attempts = 0;
        loop {
            debug!("Attempting to acquire run lock: {}", path.display());
            let file = open_lock_file(path)?;
            match Self::lock_opened(file, path) {
                Err(LockError::Stale(_)) if attempts < MAX_STALE_RETRIES => attempts += 1,
                other => return other,
            }
        }
    }

    /// Locks an already opened lock file. Fails with `Stale` when the file was
    /// unlinked or replaced between opening and locking.
    pub fn lock_opened(mut file: File, path: &Path) -> Result<Self, LockError> {
        // Fully qualified: newer std has an inherent File::try_lock_exclusive.
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(LockError::Held(path.to_path_buf()));
            }
            return Err(LockError::Acquire(e));
        }
        if !still_linked(&file, path) {
            debug!("Lock file {} was replaced before locking", path.display());
            return Err(LockError::Stale(path.to_path_buf()));
        }

        file.set_len(0).map_err(LockError::Acquire)?;
        write!(file, "{}", std::process::id()).map_err(LockError::Acquire)?;
        file.flush().map_err(LockError::Acquire)?;

        info!("Acquired lock: {}", path.display());
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Removes the lock file, then unlocks. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
        if let Err(e) = FileExt::unlock(&file) {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
        drop(file);
        info!("Released lock: {}", self.path.display());
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}
