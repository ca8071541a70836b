//! Stability checks: a file (or a directory) counts as finished when it has
//! not changed across a wait window.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::models::{matches_extension, FileRecord, RecordSet, Stability};

pub fn file_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .unwrap_or_default()
}

fn current_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub files: BTreeMap<String, u64>,
}

impl DirectorySnapshot {
    pub fn capture(dir: &Path, extensions: &[String]) -> std::io::Result<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(err.into());
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                debug!("Ignoring non UTF-8 name: {}", entry.path().display());
                continue;
            };
            if !matches_extension(name, extensions) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                files.insert(name.to_string(), meta.len());
            }
        }
        Ok(Self { files })
    }

    pub fn total_size(&self) -> u64 {
        self.files.values().sum()
    }

    /// Same aggregate size (nonzero) and the same names with the same sizes.
    /// Membership changes count as instability even when the total matches.
    pub fn is_stable_against(&self, earlier: &DirectorySnapshot) -> bool {
        let total = self.total_size();
        if total == 0 || total != earlier.total_size() {
            return false;
        }
        self.files == earlier.files
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityDetector;

impl StabilityDetector {
    pub fn new() -> Self {
        Self
    }

    pub async fn check_file_stability(&self, record: &mut FileRecord, wait: Duration) -> bool {
        match current_size(&record.path) {
            Some(size) => record.initial_size = size,
            None => {
                record.observe(None);
                debug!("File disappeared before stability check: {}", record.name);
                return false;
            }
        }
        sleep(wait).await;
        record.observe(current_size(&record.path));
        log_observation(record);
        record.is_stable()
    }

    pub async fn check_records(&self, records: &mut RecordSet, wait: Duration) -> usize {
        for record in records.iter_mut() {
            if let Some(size) = current_size(&record.path) {
                record.initial_size = size;
            }
        }
        info!("Waiting {:?} to check stability of {} file(s)", wait, records.len());
        sleep(wait).await;
        let mut stable = 0;
        for record in records.iter_mut() {
            record.observe(current_size(&record.path));
            log_observation(record);
            if record.is_stable() {
                stable += 1;
            }
        }
        stable
    }

    pub async fn check_directory_stability(
        &self,
        dir: &Path,
        wait: Duration,
        extensions: &[String],
    ) -> bool {
        let before = match DirectorySnapshot::capture(dir, extensions) {
            Ok(s) => s,
            Err(e) => {
                debug!("Cannot list {}: {}", dir.display(), e);
                return false;
            }
        };
        info!("Waiting {:?} to check directory stability of {}", wait, dir.display());
        sleep(wait).await;
        let after = match DirectorySnapshot::capture(dir, extensions) {
            Ok(s) => s,
            Err(e) => {
                debug!("Cannot list {}: {}", dir.display(), e);
                return false;
            }
        };
        let stable = after.is_stable_against(&before);
        if stable {
            info!("Directory is stable: {}", dir.display());
        } else if after.total_size() == before.total_size() && after.total_size() > 0 {
            info!("Directory contents changed during stability wait: {}", dir.display());
        } else {
            debug!(
                "Directory size changed: {} -> {}",
                before.total_size(),
                after.total_size()
            );
        }
        stable
    }
}

fn log_observation(record: &FileRecord) {
    match record.stability {
        Stability::Unstable => debug!(
            "File unstable: {} (size {} -> {})",
            record.name, record.initial_size, record.final_size
        ),
        Stability::Vanished => debug!("File disappeared: {}", record.name),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, u64)]) -> DirectorySnapshot {
        DirectorySnapshot {
            files: entries.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
        }
    }

    #[test]
    fn renamed_file_with_same_total_is_unstable() {
        let before = snapshot(&[("a.pdf", 10), ("b.pdf", 20)]);
        let after = snapshot(&[("a.pdf", 10), ("c.pdf", 20)]);
        assert_eq!(before.total_size(), after.total_size());
        assert!(!after.is_stable_against(&before));
    }

    #[test]
    fn swapped_sizes_are_unstable() {
        let before = snapshot(&[("a.pdf", 10), ("b.pdf", 20)]);
        let after = snapshot(&[("a.pdf", 20), ("b.pdf", 10)]);
        assert!(!after.is_stable_against(&before));
    }

    #[test]
    fn empty_directory_is_never_stable() {
        let empty = DirectorySnapshot::default();
        assert!(!empty.is_stable_against(&DirectorySnapshot::default()));
    }

    #[test]
    fn age_of_missing_file_is_zero() {
        assert_eq!(file_age(Path::new("/nonexistent/scan.pdf")), Duration::ZERO);
    }
}
