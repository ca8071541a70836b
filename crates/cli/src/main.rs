use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scanbox::lock::{LockError, RunLock};
use scanbox_core::config::{self, AppConfig, ScanSettings};
use scanbox_core::merger::{DocumentMerger, MergeRequest, PdfMerger};
use scanbox_core::{RunSummary, ScanOrchestrator};
use std::path::{Path, PathBuf};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    scanbox::logging::init(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            let cfg = config::load(cli.config.as_deref())?;
            run(cfg, args).await
        }
        Commands::Merge(args) => merge(args),
    }
}

#[derive(Parser)]
#[command(name = "scanbox")]
#[command(about = "Move scanned files into place and merge duplex scans", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the source directory once (meant to be run periodically)
    Run(RunArgs),
    /// Merge two duplex scan passes into one PDF
    Merge(MergeArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Source directory containing scanned files
    #[arg(long)]
    source_dir: Option<String>,
    /// Destination directory for processed files
    #[arg(long)]
    dest_dir: Option<String>,
    /// Lock file path to prevent concurrent execution
    #[arg(long)]
    lock_file: Option<String>,
    /// User ID for file ownership
    #[arg(long)]
    user_id: Option<u32>,
    /// Group ID for file ownership
    #[arg(long)]
    group_id: Option<u32>,
    /// Seconds to wait when checking file stability
    #[arg(long)]
    stability_wait: Option<u64>,
    /// Seconds to wait for the directory to settle before merging duplex scans
    #[arg(long)]
    duplex_wait: Option<u64>,
    /// Minutes after which an unstable regular file is moved anyway
    #[arg(long)]
    max_age: Option<u64>,
    /// File extensions to process (e.g. .pdf .jpg png)
    #[arg(long, num_args = 1..)]
    file_types: Vec<String>,
    /// Log intended actions without touching any file
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Output JSON summary
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MergeArgs {
    /// First pass (front pages, forward order)
    first: PathBuf,
    /// Second pass (back pages, reverse order)
    second: PathBuf,
    /// Output file path for the merged PDF
    output: PathBuf,
    /// Delete source files after a successful merge
    #[arg(long, default_value_t = false)]
    delete_source: bool,
    /// Drop pages with no visible content
    #[arg(long, default_value_t = false)]
    remove_empty_pages: bool,
}

fn apply_overrides(cfg: &mut AppConfig, args: &RunArgs) {
    if let Some(dir) = &args.source_dir {
        cfg.paths.source = Some(dir.clone());
    }
    if let Some(dir) = &args.dest_dir {
        cfg.paths.destination = Some(dir.clone());
    }
    if let Some(lock) = &args.lock_file {
        cfg.paths.lock_file = lock.clone();
    }
    if args.user_id.is_some() {
        cfg.ownership.uid = args.user_id;
    }
    if args.group_id.is_some() {
        cfg.ownership.gid = args.group_id;
    }
    if let Some(secs) = args.stability_wait {
        cfg.stability.wait_secs = secs;
    }
    if let Some(secs) = args.duplex_wait {
        cfg.stability.duplex_gate_secs = secs;
    }
    if let Some(mins) = args.max_age {
        cfg.stability.max_age_mins = mins;
    }
    if !args.file_types.is_empty() {
        cfg.scan.extensions = args.file_types.clone();
    }
    if args.dry_run {
        cfg.safety.dry_run = true;
    }
}

async fn run(mut cfg: AppConfig, args: RunArgs) -> Result<()> {
    apply_overrides(&mut cfg, &args);
    let settings = ScanSettings::from_config(&cfg).context("invalid configuration")?;

    let _lock = match RunLock::acquire(Path::new(&cfg.paths.lock_file)) {
        Ok(lock) => lock,
        Err(LockError::Held(path)) => {
            warn!(
                "Another instance is already running ({}), exiting",
                path.display()
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to acquire run lock"),
    };

    let mut orchestrator = ScanOrchestrator::new(settings);
    let summary = orchestrator.run().await;
    print_summary(&summary, args.json)
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let summary_json = serde_json::json!({
            "status": "ok",
            "processed": summary.processed(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&summary_json)?);
    } else {
        println!(
            "run ({:?}): processed {}, moved {}, merged {}, duplicates {}, unstable {}{}",
            summary.outcome,
            summary.processed(),
            summary.moved,
            summary.merged,
            summary.duplicates,
            summary.unstable,
            if summary.dry_run { " [dry-run]" } else { "" }
        );
    }
    Ok(())
}

fn merge(args: MergeArgs) -> Result<()> {
    let request = MergeRequest {
        first: args.first,
        second: args.second,
        output: args.output,
        delete_sources: args.delete_source,
        drop_blank_pages: args.remove_empty_pages,
    };
    let stats = PdfMerger::new().merge(&request).with_context(|| {
        format!(
            "failed to merge {} + {}",
            request.first.display(),
            request.second.display()
        )
    })?;
    println!(
        "merged {} page(s) into {} ({} blank dropped)",
        stats.pages_written,
        request.output.display(),
        stats.blank_pages_dropped
    );
    Ok(())
}
