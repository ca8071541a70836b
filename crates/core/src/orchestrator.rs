use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ScanSettings;
use crate::merger::{DocumentMerger, PdfMerger};
use crate::models::{FileRecord, RecordSet, Stability};
use crate::pairing::PairingEngine;
use crate::relocate::{MoveOutcome, Relocator};
use crate::stability::StabilityDetector;
use crate::tagger::{assign_tag, records_with_tag, TagQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Scanning,
    UntaggedStability,
    Tagging,
    RelocatingUntagged,
    DuplexGate,
    Pairing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    #[default]
    Completed,
    MissingSource,
    MissingDestination,
    ScanFailed,
    NoFiles,
    /// Regular files were handled but duplex groups were left for a later run.
    DuplexGateUnstable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub dry_run: bool,
    pub discovered: usize,
    pub moved: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub unstable: usize,
    pub vanished: usize,
    pub forced: usize,
    pub rejected_pairs: usize,
    pub odd_groups: usize,
    pub move_failures: usize,
    pub merge_failures: usize,
    pub ownership_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    fn new(dry_run: bool) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            dry_run,
            discovered: 0,
            moved: 0,
            merged: 0,
            duplicates: 0,
            unstable: 0,
            vanished: 0,
            forced: 0,
            rejected_pairs: 0,
            odd_groups: 0,
            move_failures: 0,
            merge_failures: 0,
            ownership_failures: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn processed(&self) -> usize {
        self.moved + self.merged
    }
}

pub struct ScanOrchestrator {
    settings: ScanSettings,
    detector: StabilityDetector,
    relocator: Relocator,
    merger: Arc<dyn DocumentMerger>,
    records: RecordSet,
    phase: RunPhase,
}

impl ScanOrchestrator {
    pub fn new(settings: ScanSettings) -> Self {
        let relocator = Relocator::new(settings.ownership, settings.dry_run);
        Self {
            settings,
            detector: StabilityDetector::new(),
            relocator,
            merger: Arc::new(PdfMerger::new()),
            records: RecordSet::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn with_merger(mut self, merger: Arc<dyn DocumentMerger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    fn advance(&mut self, next: RunPhase) {
        debug!("phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::new(self.settings.dry_run);
        self.records = RecordSet::new();
        self.phase = RunPhase::Idle;

        if !self.settings.source.is_dir() {
            error!(
                "Source directory does not exist: {}",
                self.settings.source.display()
            );
            return self.finish(summary, RunOutcome::MissingSource);
        }
        if !self.settings.destination.is_dir() {
            error!(
                "Destination directory does not exist: {}",
                self.settings.destination.display()
            );
            return self.finish(summary, RunOutcome::MissingDestination);
        }
        if self.settings.dry_run {
            info!("DRY-RUN MODE: no files will be moved, merged or deleted");
        }
        info!(
            "Processing file types: {}",
            self.settings.extensions.join(", ")
        );

        self.advance(RunPhase::Scanning);
        match RecordSet::collect(&self.settings.source, &self.settings.extensions) {
            Ok(records) => self.records = records,
            Err(e) => {
                error!(
                    "Failed to list {}: {}",
                    self.settings.source.display(),
                    e
                );
                return self.finish(summary, RunOutcome::ScanFailed);
            }
        }
        summary.discovered = self.records.len();
        if self.records.is_empty() {
            info!("No files to process");
            return self.finish(summary, RunOutcome::NoFiles);
        }
        info!("Found {} file(s) to process", summary.discovered);

        self.advance(RunPhase::UntaggedStability);
        self.detector
            .check_records(&mut self.records, self.settings.stability_wait)
            .await;
        for record in self.records.iter() {
            match record.stability {
                Stability::Unstable => summary.unstable += 1,
                Stability::Vanished => summary.vanished += 1,
                _ => {}
            }
        }

        self.advance(RunPhase::Tagging);
        for rule in &self.settings.tags {
            let matched = assign_tag(&mut self.records, &rule.pattern, &rule.name);
            if matched > 0 {
                info!("Tagged {} file(s) as '{}'", matched, rule.name);
            }
        }

        self.advance(RunPhase::RelocatingUntagged);
        self.relocate_untagged(&mut summary);

        self.advance(RunPhase::DuplexGate);
        if self.pending_duplex() == 0 {
            debug!("No duplex files pending");
            return self.finish(summary, RunOutcome::Completed);
        }
        let gate_open = self
            .detector
            .check_directory_stability(
                &self.settings.source,
                self.settings.duplex_gate_wait,
                &self.settings.extensions,
            )
            .await;
        if !gate_open {
            warn!("Source directory not stable, leaving duplex files for the next run");
            return self.finish(summary, RunOutcome::DuplexGateUnstable);
        }

        self.advance(RunPhase::Pairing);
        self.pair_and_merge(&mut summary).await;

        self.finish(summary, RunOutcome::Completed)
    }

    fn relocate_untagged(&mut self, summary: &mut RunSummary) {
        let candidates: Vec<FileRecord> =
            records_with_tag(&self.records, &TagQuery::untagged().include_unstable())
                .into_iter()
                .cloned()
                .collect();

        for record in candidates {
            match record.stability {
                Stability::Stable => {}
                Stability::Vanished => continue,
                _ if record.age > self.settings.max_age => {
                    warn!(
                        "File {} is older than {} minutes, moving anyway",
                        record.name,
                        self.settings.max_age.as_secs() / 60
                    );
                    summary.forced += 1;
                }
                _ => {
                    info!("Skipping unstable file: {}", record.name);
                    continue;
                }
            }

            match self
                .relocator
                .relocate(&record.path, &self.settings.destination)
            {
                Ok(MoveOutcome::Moved {
                    ownership_applied, ..
                }) => {
                    summary.moved += 1;
                    if !ownership_applied {
                        summary.ownership_failures += 1;
                    }
                    self.records.remove(&record.name);
                }
                Ok(MoveOutcome::WouldMove { .. }) => summary.moved += 1,
                Ok(MoveOutcome::Duplicate { source_removed }) => {
                    summary.duplicates += 1;
                    if source_removed {
                        self.records.remove(&record.name);
                    }
                }
                Ok(MoveOutcome::Vanished) => {
                    summary.vanished += 1;
                    self.records.remove(&record.name);
                }
                Err(e) => {
                    error!("{}", e);
                    summary.move_failures += 1;
                }
            }
        }
    }

    fn pending_duplex(&self) -> usize {
        self.settings
            .tags
            .iter()
            .map(|rule| {
                let query = TagQuery::new(&rule.name).extensions(&self.settings.merge_extensions);
                records_with_tag(&self.records, &query).len()
            })
            .sum()
    }

    async fn pair_and_merge(&mut self, summary: &mut RunSummary) {
        let engine = PairingEngine::new(
            Arc::clone(&self.merger),
            &self.relocator,
            &self.settings.destination,
        )
        .delete_sources(self.settings.delete_sources)
        .drop_blank_pages(self.settings.drop_blank_pages);

        for rule in &self.settings.tags {
            let mut query = TagQuery::new(&rule.name).extensions(&self.settings.merge_extensions);
            if let Some(pattern) = &rule.sort_pattern {
                query = query.sort_by(pattern);
            }
            let group = records_with_tag(&self.records, &query);
            if group.is_empty() {
                continue;
            }
            info!(
                "Pairing {} file(s) tagged '{}' ({:?})",
                group.len(),
                rule.name,
                rule.strategy
            );
            let report = engine.merge_group(&rule.name, &group, rule.strategy).await;

            summary.merged += report.merged;
            summary.rejected_pairs += report.rejected_pairs;
            summary.merge_failures += report.failed;
            summary.ownership_failures += report.ownership_failures;
            if report.odd_count {
                summary.odd_groups += 1;
            }
            if !self.settings.dry_run && self.settings.delete_sources {
                for name in &report.consumed {
                    self.records.remove(name);
                }
            }
        }
    }

    fn finish(&mut self, mut summary: RunSummary, outcome: RunOutcome) -> RunSummary {
        summary.outcome = outcome;
        summary.finished_at = Some(Utc::now());
        self.advance(RunPhase::Done);
        info!(
            "Run finished ({:?}): moved {}, merged {}, duplicates {}, unstable {}",
            outcome, summary.moved, summary.merged, summary.duplicates, summary.unstable
        );
        summary
    }
}
