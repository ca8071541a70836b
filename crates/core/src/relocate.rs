use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("failed to move {from} -> {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to set ownership/permissions on {path}: {source}")]
    Ownership {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: u32,
}

impl Default for Ownership {
    fn default() -> Self {
        Self {
            uid: None,
            gid: None,
            mode: 0o660,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved {
        destination: PathBuf,
        ownership_applied: bool,
    },
    /// Dry run: nothing touched, but the move would have happened.
    WouldMove { destination: PathBuf },
    /// Destination name already taken; the source was treated as redundant.
    Duplicate { source_removed: bool },
    Vanished,
}

#[derive(Debug, Clone)]
pub struct Relocator {
    ownership: Ownership,
    dry_run: bool,
}

impl Relocator {
    pub fn new(ownership: Ownership, dry_run: bool) -> Self {
        Self { ownership, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn relocate(&self, source: &Path, dest_dir: &Path) -> Result<MoveOutcome, RelocateError> {
        let Some(name) = source.file_name() else {
            return Ok(MoveOutcome::Vanished);
        };
        if !source.exists() {
            debug!("File disappeared before move: {}", source.display());
            return Ok(MoveOutcome::Vanished);
        }
        let destination = dest_dir.join(name);

        if destination.exists() {
            warn!(
                "Destination file already exists, skipping: {}",
                destination.display()
            );
            if self.dry_run {
                info!("[dry-run] Would remove duplicate source file: {}", source.display());
                return Ok(MoveOutcome::Duplicate {
                    source_removed: false,
                });
            }
            let source_removed = match fs::remove_file(source) {
                Ok(()) => {
                    info!("Removed duplicate source file: {}", source.display());
                    true
                }
                Err(e) => {
                    warn!("Failed to remove duplicate source {}: {}", source.display(), e);
                    false
                }
            };
            return Ok(MoveOutcome::Duplicate { source_removed });
        }

        if self.dry_run {
            info!(
                "[dry-run] Would move file: {} -> {}",
                source.display(),
                destination.display()
            );
            info!(
                "[dry-run] Would set ownership to {} and permissions to {:o}",
                self.owner_label(),
                self.ownership.mode
            );
            return Ok(MoveOutcome::WouldMove { destination });
        }

        match move_file(source, &destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                debug!("File disappeared during move: {}", source.display());
                return Ok(MoveOutcome::Vanished);
            }
            Err(source_err) => {
                return Err(RelocateError::Move {
                    from: source.to_path_buf(),
                    to: destination,
                    source: source_err,
                })
            }
        }

        let ownership_applied = match self.normalize(&destination) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        };
        info!("Moved file: {} -> {}", source.display(), destination.display());
        Ok(MoveOutcome::Moved {
            destination,
            ownership_applied,
        })
    }

    pub fn normalize(&self, path: &Path) -> Result<(), RelocateError> {
        if self.dry_run {
            info!(
                "[dry-run] Would set ownership of {} to {} and permissions to {:o}",
                path.display(),
                self.owner_label(),
                self.ownership.mode
            );
            return Ok(());
        }
        apply_ownership(path, &self.ownership).map_err(|source| RelocateError::Ownership {
            path: path.to_path_buf(),
            source,
        })
    }

    fn owner_label(&self) -> String {
        let id = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
        format!("{}:{}", id(self.ownership.uid), id(self.ownership.gid))
    }
}

#[cfg(unix)]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE)
}

/// Rename, falling back to copy + delete only when source and destination
/// live on different filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("rename crosses filesystems ({}), copying instead", e);
            copy_across(from, to)
        }
        Err(e) => Err(e),
    }
}

fn copy_across(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from) {
        // Never leave the file in both places.
        if let Err(cleanup) = fs::remove_file(to) {
            warn!("Could not remove partial copy {}: {}", to.display(), cleanup);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn apply_ownership(path: &Path, ownership: &Ownership) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::os::unix::fs::chown(path, ownership.uid, ownership.gid)?;
    fs::set_permissions(path, fs::Permissions::from_mode(ownership.mode))
}

#[cfg(not(unix))]
fn apply_ownership(path: &Path, _ownership: &Ownership) -> io::Result<()> {
    debug!("Ownership normalization unsupported on this platform: {}", path.display());
    Ok(())
}
