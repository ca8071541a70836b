use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task;
use tracing::{error, info, warn};

use crate::merger::{DocumentMerger, MergeError, MergeRequest};
use crate::models::FileRecord;
use crate::relocate::Relocator;

pub const MERGED_SUFFIX: &str = "_merged.pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStrategy {
    /// `(0,1), (2,3), …` for batches where each sheet's sides are adjacent.
    Consecutive,
    /// `(0,n-1), (1,n-2), …` for one batch of fronts followed by reversed backs.
    OutsideIn,
}

impl PairingStrategy {
    pub fn index_pairs(self, count: usize) -> Vec<(usize, usize)> {
        let half = count / 2;
        match self {
            PairingStrategy::Consecutive => (0..half).map(|i| (2 * i, 2 * i + 1)).collect(),
            PairingStrategy::OutsideIn => (0..half).map(|i| (i, count - 1 - i)).collect(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("cannot pair odd count of {count} file(s) tagged '{tag}'")]
    OddCount { tag: String, count: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PairRejection {
    #[error("no number in file name {0}")]
    MissingNumber(String),
    #[error("number in file name {0} is out of range")]
    NumberOutOfRange(String),
    #[error("{left} ({left_number}) does not precede {right} ({right_number})")]
    OutOfOrder {
        left: String,
        right: String,
        left_number: u64,
        right_number: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePair {
    pub left: PathBuf,
    pub right: PathBuf,
    pub left_name: String,
    pub right_name: String,
    pub left_number: String,
    pub right_number: String,
}

impl MergePair {
    pub fn output_name(&self, tag: &str) -> String {
        format!(
            "{}_{}_{}{}",
            tag, self.left_number, self.right_number, MERGED_SUFFIX
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingPlan {
    pub pairs: Vec<MergePair>,
    pub rejected: Vec<PairRejection>,
}

pub fn first_number(name: &str) -> Option<&str> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn numbered(name: &str) -> Result<(&str, u64), PairRejection> {
    let digits = first_number(name).ok_or_else(|| PairRejection::MissingNumber(name.to_string()))?;
    let value = digits
        .parse::<u64>()
        .map_err(|_| PairRejection::NumberOutOfRange(name.to_string()))?;
    Ok((digits, value))
}

fn validate(left: &FileRecord, right: &FileRecord) -> Result<MergePair, PairRejection> {
    let (left_digits, left_number) = numbered(&left.name)?;
    let (right_digits, right_number) = numbered(&right.name)?;
    if left_number >= right_number {
        return Err(PairRejection::OutOfOrder {
            left: left.name.clone(),
            right: right.name.clone(),
            left_number,
            right_number,
        });
    }
    Ok(MergePair {
        left: left.path.clone(),
        right: right.path.clone(),
        left_name: left.name.clone(),
        right_name: right.name.clone(),
        left_number: left_digits.to_string(),
        right_number: right_digits.to_string(),
    })
}

/// Splits a sorted, same-tag, stability-checked group into validated pairs.
/// Pairs are never swapped; a pair whose numbers are not strictly ascending
/// is rejected.
pub fn plan_pairs<R: Borrow<FileRecord>>(
    tag: &str,
    records: &[R],
    strategy: PairingStrategy,
) -> Result<PairingPlan, PairingError> {
    debug_assert!(records
        .iter()
        .all(|r| r.borrow().has_tag(tag) && r.borrow().is_checked()));

    if records.len() % 2 != 0 {
        return Err(PairingError::OddCount {
            tag: tag.to_string(),
            count: records.len(),
        });
    }

    let mut plan = PairingPlan::default();
    for (l, r) in strategy.index_pairs(records.len()) {
        match validate(records[l].borrow(), records[r].borrow()) {
            Ok(pair) => plan.pairs.push(pair),
            Err(rejection) => plan.rejected.push(rejection),
        }
    }
    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub merged: usize,
    pub rejected_pairs: usize,
    pub failed: usize,
    pub ownership_failures: usize,
    pub odd_count: bool,
    pub consumed: Vec<String>,
}

pub struct PairingEngine<'a> {
    merger: Arc<dyn DocumentMerger>,
    relocator: &'a Relocator,
    destination: &'a Path,
    delete_sources: bool,
    drop_blank_pages: bool,
}

impl<'a> PairingEngine<'a> {
    pub fn new(
        merger: Arc<dyn DocumentMerger>,
        relocator: &'a Relocator,
        destination: &'a Path,
    ) -> Self {
        Self {
            merger,
            relocator,
            destination,
            delete_sources: true,
            drop_blank_pages: true,
        }
    }

    pub fn delete_sources(mut self, delete: bool) -> Self {
        self.delete_sources = delete;
        self
    }

    pub fn drop_blank_pages(mut self, drop: bool) -> Self {
        self.drop_blank_pages = drop;
        self
    }

    pub async fn merge_group<R: Borrow<FileRecord>>(
        &self,
        tag: &str,
        records: &[R],
        strategy: PairingStrategy,
    ) -> GroupReport {
        let mut report = GroupReport::default();
        let plan = match plan_pairs(tag, records, strategy) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("{}", e);
                report.odd_count = true;
                return report;
            }
        };

        for rejection in &plan.rejected {
            warn!("Skipping pair tagged '{}': {}", tag, rejection);
        }
        report.rejected_pairs = plan.rejected.len();

        for pair in plan.pairs {
            let output = self.destination.join(pair.output_name(tag));
            if self.relocator.is_dry_run() {
                info!(
                    "[dry-run] Would merge {} + {} -> {}",
                    pair.left_name,
                    pair.right_name,
                    output.display()
                );
                report.merged += 1;
                continue;
            }

            let request = MergeRequest {
                first: pair.left.clone(),
                second: pair.right.clone(),
                output: output.clone(),
                delete_sources: self.delete_sources,
                drop_blank_pages: self.drop_blank_pages,
            };
            let merger = Arc::clone(&self.merger);
            let result = task::spawn_blocking(move || merger.merge(&request))
                .await
                .map_err(|e| MergeError::Task(e.to_string()))
                .and_then(|r| r);

            match result {
                Ok(stats) => {
                    if let Err(e) = self.relocator.normalize(&output) {
                        error!("{}", e);
                        report.ownership_failures += 1;
                    }
                    info!(
                        "Merged {} + {} into {} ({} pages)",
                        pair.left_name,
                        pair.right_name,
                        output.display(),
                        stats.pages_written
                    );
                    report.merged += 1;
                    report.consumed.push(pair.left_name);
                    report.consumed.push(pair.right_name);
                }
                Err(e) => {
                    error!(
                        "Failed to merge {} + {}: {}",
                        pair.left_name, pair.right_name, e
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_pairs_adjacent_entries() {
        assert_eq!(
            PairingStrategy::Consecutive.index_pairs(6),
            vec![(0, 1), (2, 3), (4, 5)]
        );
    }

    #[test]
    fn outside_in_pairs_ends_towards_middle() {
        assert_eq!(
            PairingStrategy::OutsideIn.index_pairs(6),
            vec![(0, 5), (1, 4), (2, 3)]
        );
        assert!(PairingStrategy::OutsideIn.index_pairs(0).is_empty());
    }

    #[test]
    fn first_number_takes_first_run_only() {
        assert_eq!(first_number("double-sided_12_page3.pdf"), Some("12"));
        assert_eq!(first_number("scan007.pdf"), Some("007"));
        assert_eq!(first_number("cover.pdf"), None);
    }

    #[test]
    fn output_name_keeps_extracted_digits() {
        let pair = MergePair {
            left: PathBuf::from("double-sided_01.pdf"),
            right: PathBuf::from("double-sided_02.pdf"),
            left_name: "double-sided_01.pdf".into(),
            right_name: "double-sided_02.pdf".into(),
            left_number: "01".into(),
            right_number: "02".into(),
        };
        assert_eq!(
            pair.output_name("double-sided"),
            "double-sided_01_02_merged.pdf"
        );
    }
}
