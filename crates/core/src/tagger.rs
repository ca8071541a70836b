//! Filename-pattern tagging and tag-based selection of records.

use regex::Regex;
use tracing::debug;

use crate::models::{FileRecord, RecordSet};

pub fn assign_tag(records: &mut RecordSet, pattern: &Regex, tag: &str) -> usize {
    let mut matched = 0;
    for record in records.iter_mut() {
        if pattern.is_match(&record.name) {
            debug!("Tagging file {} with tag '{}'", record.name, tag);
            record.add_tag(tag);
            matched += 1;
        }
    }
    matched
}

#[derive(Debug, Clone, Copy)]
pub struct TagQuery<'a> {
    /// Empty string selects untagged records.
    pub tag: &'a str,
    pub extensions: Option<&'a [String]>,
    pub stable_only: bool,
    pub sort_pattern: Option<&'a Regex>,
}

impl<'a> TagQuery<'a> {
    pub fn new(tag: &'a str) -> Self {
        Self {
            tag,
            extensions: None,
            stable_only: true,
            sort_pattern: None,
        }
    }

    pub fn untagged() -> Self {
        Self::new("")
    }

    pub fn extensions(mut self, extensions: &'a [String]) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn include_unstable(mut self) -> Self {
        self.stable_only = false;
        self
    }

    pub fn sort_by(mut self, pattern: &'a Regex) -> Self {
        self.sort_pattern = Some(pattern);
        self
    }
}

/// Records matching `query`, in file-name order unless a sort pattern is
/// given. With a sort pattern the key is the first match as a string (empty
/// when absent), compared lexicographically: `"10"` sorts before `"9"`.
pub fn records_with_tag<'r>(records: &'r RecordSet, query: &TagQuery<'_>) -> Vec<&'r FileRecord> {
    let mut selected: Vec<&FileRecord> = records
        .iter()
        .filter(|r| r.has_tag(query.tag))
        .filter(|r| !query.stable_only || r.is_stable())
        .filter(|r| query.extensions.map_or(true, |exts| r.has_extension(exts)))
        .collect();

    if let Some(pattern) = query.sort_pattern {
        selected.sort_by_cached_key(|r| sort_key(pattern, &r.name));
    }
    selected
}

fn sort_key(pattern: &Regex, name: &str) -> String {
    pattern
        .find(name)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
