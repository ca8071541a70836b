use scanbox_core::merger::{DocumentMerger, MergeError, MergeRequest, MergeStats};
use scanbox_core::models::{FileRecord, Stability};
use scanbox_core::pairing::{plan_pairs, PairRejection, PairingEngine, PairingError, PairingStrategy};
use scanbox_core::relocate::{Ownership, Relocator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn tagged(dir: &Path, name: &str, tag: &str) -> FileRecord {
    let mut r = FileRecord::new(dir.join(name), name.to_string(), 64, Duration::ZERO);
    r.stability = Stability::Stable;
    r.add_tag(tag);
    r
}

fn group(dir: &Path, tag: &str, names: &[&str]) -> Vec<FileRecord> {
    names.iter().map(|n| tagged(dir, n, tag)).collect()
}

/// Writes a small placeholder output and records every request it receives.
/// Requests whose first input contains `fail_on` are refused.
#[derive(Default)]
struct RecordingMerger {
    calls: Mutex<Vec<(String, String, String)>>,
    fail_on: Option<String>,
}

impl RecordingMerger {
    fn failing_on(name: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(name.to_string()),
        }
    }

    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

impl DocumentMerger for RecordingMerger {
    fn merge(&self, request: &MergeRequest) -> Result<MergeStats, MergeError> {
        self.calls.lock().unwrap().push((
            file_name(&request.first),
            file_name(&request.second),
            file_name(&request.output),
        ));
        if let Some(fail_on) = &self.fail_on {
            if file_name(&request.first).contains(fail_on.as_str()) {
                return Err(MergeError::MissingInput(request.first.clone()));
            }
        }
        fs::write(&request.output, b"%PDF-1.5 merged")?;
        if request.delete_sources {
            fs::remove_file(&request.first)?;
            fs::remove_file(&request.second)?;
        }
        Ok(MergeStats {
            pages_written: 2,
            blank_pages_dropped: 0,
        })
    }
}

#[test]
fn odd_group_yields_no_pairs() {
    let records = group(
        Path::new("/scans"),
        "double-sided",
        &["double-sided_1.pdf", "double-sided_2.pdf", "double-sided_3.pdf"],
    );
    let err = plan_pairs("double-sided", &records, PairingStrategy::Consecutive).unwrap_err();
    assert_eq!(
        err,
        PairingError::OddCount {
            tag: "double-sided".into(),
            count: 3
        }
    );
}

#[test]
fn empty_group_yields_empty_plan() {
    let records: Vec<FileRecord> = Vec::new();
    let plan = plan_pairs("double-sided", &records, PairingStrategy::OutsideIn).unwrap();
    assert!(plan.pairs.is_empty());
    assert!(plan.rejected.is_empty());
}

#[test]
fn outside_in_pairs_fronts_with_reversed_backs() {
    let records = group(
        Path::new("/scans"),
        "duplex-batch",
        &[
            "duplex-batch_1.pdf",
            "duplex-batch_2.pdf",
            "duplex-batch_3.pdf",
            "duplex-batch_4.pdf",
        ],
    );
    let plan = plan_pairs("duplex-batch", &records, PairingStrategy::OutsideIn).unwrap();
    let outputs: Vec<String> = plan
        .pairs
        .iter()
        .map(|p| p.output_name("duplex-batch"))
        .collect();
    assert_eq!(
        outputs,
        vec![
            "duplex-batch_1_4_merged.pdf",
            "duplex-batch_2_3_merged.pdf"
        ]
    );
}

#[test]
fn pairs_out_of_order_or_without_numbers_are_rejected() {
    let records = group(
        Path::new("/scans"),
        "double-sided",
        &[
            "double-sided_5.pdf",
            "double-sided_3.pdf",
            "double-sided_front.pdf",
            "double-sided_8.pdf",
            "double-sided_10.pdf",
            "double-sided_11.pdf",
        ],
    );
    let plan = plan_pairs("double-sided", &records, PairingStrategy::Consecutive).unwrap();

    assert_eq!(plan.pairs.len(), 1);
    assert_eq!(plan.pairs[0].left_name, "double-sided_10.pdf");
    assert_eq!(plan.pairs[0].right_name, "double-sided_11.pdf");
    assert_eq!(
        plan.rejected,
        vec![
            PairRejection::OutOfOrder {
                left: "double-sided_5.pdf".into(),
                right: "double-sided_3.pdf".into(),
                left_number: 5,
                right_number: 3,
            },
            PairRejection::MissingNumber("double-sided_front.pdf".into()),
        ]
    );
}

#[test]
fn equal_numbers_are_rejected() {
    let records = group(
        Path::new("/scans"),
        "double-sided",
        &["double-sided_7_a.pdf", "double-sided_7_b.pdf"],
    );
    let plan = plan_pairs("double-sided", &records, PairingStrategy::Consecutive).unwrap();
    assert!(plan.pairs.is_empty());
    assert_eq!(plan.rejected.len(), 1);
}

#[test]
fn accepted_pairs_always_ascend() {
    // Every ordering of four numbered files, both strategies.
    let numbers = [1u32, 2, 3, 4];
    let mut orders = Vec::new();
    for a in 0..4 {
        for b in 0..4 {
            for c in 0..4 {
                for d in 0..4 {
                    let idx = [a, b, c, d];
                    let mut seen = [false; 4];
                    if idx.iter().all(|&i| !std::mem::replace(&mut seen[i], true)) {
                        orders.push(idx.map(|i| numbers[i]));
                    }
                }
            }
        }
    }
    assert_eq!(orders.len(), 24);

    for order in orders {
        let names: Vec<String> = order.iter().map(|n| format!("scan_{n}.pdf")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let records = group(Path::new("/scans"), "batch", &refs);
        for strategy in [PairingStrategy::Consecutive, PairingStrategy::OutsideIn] {
            let plan = plan_pairs("batch", &records, strategy).unwrap();
            assert_eq!(plan.pairs.len() + plan.rejected.len(), 2);
            for pair in &plan.pairs {
                let left: u64 = pair.left_number.parse().unwrap();
                let right: u64 = pair.right_number.parse().unwrap();
                assert!(left < right, "{order:?} {strategy:?}");
            }
        }
    }
}

#[tokio::test]
async fn failed_pair_does_not_stop_later_pairs() {
    let source = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let names = [
        "double-sided_1.pdf",
        "double-sided_2.pdf",
        "double-sided_3.pdf",
        "double-sided_4.pdf",
    ];
    for name in names {
        fs::write(source.path().join(name), b"%PDF-1.5 pass").unwrap();
    }
    let records = group(source.path(), "double-sided", &names);

    let merger = Arc::new(RecordingMerger::failing_on("_1."));
    let relocator = Relocator::new(Ownership::default(), false);
    let engine = PairingEngine::new(merger.clone(), &relocator, dest.path());
    let report = engine
        .merge_group("double-sided", &records, PairingStrategy::Consecutive)
        .await;

    assert_eq!(report.merged, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
        report.consumed,
        vec!["double-sided_3.pdf".to_string(), "double-sided_4.pdf".to_string()]
    );
    assert_eq!(merger.calls().len(), 2);
    assert!(dest.path().join("double-sided_3_4_merged.pdf").exists());
    assert!(!dest.path().join("double-sided_1_2_merged.pdf").exists());
    assert!(source.path().join("double-sided_1.pdf").exists());
    assert!(!source.path().join("double-sided_3.pdf").exists());
}

#[tokio::test]
async fn dry_run_counts_merges_without_calling_merger() {
    let dest = tempdir().unwrap();
    let records = group(
        Path::new("/scans"),
        "duplex-batch",
        &["duplex-batch_1.pdf", "duplex-batch_2.pdf"],
    );
    let merger = Arc::new(RecordingMerger::default());
    let relocator = Relocator::new(Ownership::default(), true);
    let engine = PairingEngine::new(merger.clone(), &relocator, dest.path());

    let report = engine
        .merge_group("duplex-batch", &records, PairingStrategy::OutsideIn)
        .await;
    assert_eq!(report.merged, 1);
    assert!(report.consumed.is_empty());
    assert!(merger.calls().is_empty());
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn odd_group_is_reported_and_untouched() {
    let dest = tempdir().unwrap();
    let records = group(Path::new("/scans"), "double-sided", &["double-sided_1.pdf"]);
    let merger = Arc::new(RecordingMerger::default());
    let relocator = Relocator::new(Ownership::default(), false);
    let engine = PairingEngine::new(merger.clone(), &relocator, dest.path());

    let report = engine
        .merge_group("double-sided", &records, PairingStrategy::Consecutive)
        .await;
    assert!(report.odd_count);
    assert_eq!(report.merged, 0);
    assert!(merger.calls().is_empty());
}

#[test]
fn merge_pair_paths_come_from_records() {
    let records = group(
        Path::new("/scans"),
        "double-sided",
        &["double-sided_1.pdf", "double-sided_2.pdf"],
    );
    let plan = plan_pairs("double-sided", &records, PairingStrategy::Consecutive).unwrap();
    assert_eq!(plan.pairs[0].left, PathBuf::from("/scans/double-sided_1.pdf"));
    assert_eq!(plan.pairs[0].right, PathBuf::from("/scans/double-sided_2.pdf"));
}

/// Reports success without producing any output file.
struct SilentMerger;

impl DocumentMerger for SilentMerger {
    fn merge(&self, _request: &MergeRequest) -> Result<MergeStats, MergeError> {
        Ok(MergeStats::default())
    }
}

#[tokio::test]
async fn ownership_failure_still_counts_the_merge() {
    let source = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let records = group(
        source.path(),
        "double-sided",
        &["double-sided_1.pdf", "double-sided_2.pdf"],
    );
    let relocator = Relocator::new(Ownership::default(), false);
    let engine = PairingEngine::new(Arc::new(SilentMerger), &relocator, dest.path());

    let report = engine
        .merge_group("double-sided", &records, PairingStrategy::Consecutive)
        .await;
    assert_eq!(report.merged, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.ownership_failures, 1);
    assert_eq!(report.consumed.len(), 2);
}
