use serde::Serialize;
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use walkdir::WalkDir;

use crate::stability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    #[default]
    Unchecked,
    Stable,
    Unstable,
    Vanished,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub name: String,
    pub initial_size: u64,
    pub final_size: u64,
    pub age: Duration,
    pub stability: Stability,
    pub tags: BTreeSet<String>,
}

impl FileRecord {
    pub fn new(path: PathBuf, name: String, initial_size: u64, age: Duration) -> Self {
        Self {
            path,
            name,
            initial_size,
            final_size: 0,
            age,
            stability: Stability::Unchecked,
            tags: BTreeSet::new(),
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stability == Stability::Stable
    }

    pub fn is_checked(&self) -> bool {
        self.stability != Stability::Unchecked
    }

    pub fn observe(&mut self, final_size: Option<u64>) {
        match final_size {
            Some(size) => {
                self.final_size = size;
                self.stability = if self.initial_size == size && size > 0 {
                    Stability::Stable
                } else {
                    Stability::Unstable
                };
            }
            None => {
                self.final_size = 0;
                self.stability = Stability::Vanished;
            }
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    /// The empty tag matches records that carry no tag at all.
    pub fn has_tag(&self, tag: &str) -> bool {
        if tag.is_empty() {
            return self.tags.is_empty();
        }
        self.tags.contains(tag)
    }

    pub fn has_extension(&self, extensions: &[String]) -> bool {
        matches_extension(&self.name, extensions)
    }
}

#[derive(Debug, Default)]
pub struct RecordSet {
    records: BTreeMap<String, FileRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(dir: &Path, extensions: &[String]) -> std::io::Result<Self> {
        let mut set = Self::new();
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
                warn!("Skipping file with non UTF-8 name: {}", entry.path().display());
                continue;
            };
            if !matches_extension(name, extensions) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let age = stability::file_age(entry.path());
            set.insert(FileRecord::new(
                entry.path().to_path_buf(),
                name.to_string(),
                meta.len(),
                age,
            ));
        }
        Ok(set)
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.records.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FileRecord> {
        self.records.remove(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, FileRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> btree_map::ValuesMut<'_, String, FileRecord> {
        self.records.values_mut()
    }
}

pub fn matches_extension(name: &str, extensions: &[String]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(initial: u64) -> FileRecord {
        FileRecord::new(
            PathBuf::from("/tmp/scan.pdf"),
            "scan.pdf".into(),
            initial,
            Duration::ZERO,
        )
    }

    #[test]
    fn stable_only_when_sizes_match_and_nonzero() {
        let mut same = record(42);
        same.observe(Some(42));
        assert!(same.is_stable());

        let mut grown = record(42);
        grown.observe(Some(84));
        assert_eq!(grown.stability, Stability::Unstable);

        let mut empty = record(0);
        empty.observe(Some(0));
        assert_eq!(empty.stability, Stability::Unstable);

        let mut gone = record(42);
        gone.observe(None);
        assert_eq!(gone.stability, Stability::Vanished);
        assert!(gone.is_checked());
    }

    #[test]
    fn empty_tag_selects_untagged() {
        let mut r = record(1);
        assert!(r.has_tag(""));
        r.add_tag("double-sided");
        assert!(!r.has_tag(""));
        assert!(r.has_tag("double-sided"));
    }

    #[test]
    fn stability_serializes_snake_case() {
        let json = serde_json::to_string(&Stability::Vanished).unwrap();
        assert_eq!(json, "\"vanished\"");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(OsStr::from_bytes(b"scan_\xff.pdf")), b"x").unwrap();
        std::fs::write(temp.path().join("scan_1.pdf"), b"x").unwrap();

        let set = RecordSet::collect(temp.path(), &[".pdf".to_string()]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("scan_1.pdf").is_some());
    }

    #[test]
    fn extension_match_ignores_case() {
        let exts = vec![".pdf".to_string()];
        assert!(matches_extension("SCAN_01.PDF", &exts));
        assert!(!matches_extension("scan.pdf.part", &exts));
    }
}
