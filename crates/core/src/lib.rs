//! Core library: scan-file stability detection, tagging, duplex pairing and merging.

pub mod config;
pub mod merger;
pub mod models;
pub mod orchestrator;
pub mod pairing;
pub mod relocate;
pub mod stability;
pub mod tagger;

pub use orchestrator::{RunOutcome, RunPhase, RunSummary, ScanOrchestrator};
