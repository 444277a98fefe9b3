//! vibes-tracker binary: thin wrapper over the library pipeline.

mod cli;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};

use vibes_tracker::cache::ContentCache;
use vibes_tracker::config::PipelineConfig;
use vibes_tracker::pipeline::{self, Pipeline, RunMode, Services};
use vibes_tracker::telemetry::{self, Metrics};

use crate::cli::{CacheAction, Cli, Commands, ModeArgs};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::FAILURE
        }
    }
}

fn mode(args: ModeArgs) -> RunMode {
    RunMode {
        incremental: args.incremental,
        full_refresh: args.full_refresh,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load_default()?,
    };

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };
    let metrics_file = cfg.paths.metrics_file.clone();

    let result = dispatch(cli.command, cfg).await;

    if let (Some(m), Some(path)) = (&metrics, metrics_file) {
        if let Err(e) = m.write_to(Path::new(&path)) {
            warn!(error = %e, "could not write metrics file");
        }
    }
    result
}

async fn dispatch(command: Commands, cfg: PipelineConfig) -> Result<()> {
    match command {
        Commands::Collect(args) => {
            let p = Pipeline::new(cfg.clone(), Services::from_config(&cfg, true)?);
            let res = p.collect(mode(args)).await;
            p.finish();
            let s = res?;
            info!(
                collected = s.collected,
                dataset = s.dataset_size,
                failures = s.failures,
                quota_exhausted = s.quota_exhausted,
                "collection complete"
            );
        }
        Commands::Enrich(args) => {
            let p = Pipeline::new(cfg.clone(), Services::from_config(&cfg, false)?);
            let res = p.enrich(mode(args.mode), args.workers.map(usize::from)).await;
            p.finish();
            let s = res?;
            info!(
                processed = s.processed,
                enriched = s.enriched,
                unenrichable = s.unenrichable,
                failed = s.failed,
                dataset = s.dataset_size,
                "enrichment complete"
            );
        }
        Commands::Pipeline(args) => {
            let p = Pipeline::new(cfg.clone(), Services::from_config(&cfg, true)?);
            let res = p.run(args.incremental, args.workers.map(usize::from)).await;
            p.finish();
            let s = res?;
            info!(
                collected = s.collect.collected,
                enriched = s.enrich.enriched,
                snapshot = s.snapshot.as_ref().map(|m| m.date.to_string()).unwrap_or_default(),
                "pipeline complete"
            );
        }
        Commands::Snapshot => {
            let m = pipeline::snapshot_datasets(&cfg)?;
            info!(date = %m.date, files = m.files.len(), "snapshot complete");
        }
        Commands::DailyReport(args) => {
            let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
            let p = Pipeline::new(cfg.clone(), Services::from_config(&cfg, true)?);
            let res = p.daily_report(date).await;
            p.finish();
            let path = res?;
            info!(path = %path.display(), "daily report complete");
        }
        Commands::Cache { action } => {
            let cache = ContentCache::new(&cfg.analysis.cache_dir, true);
            match action {
                CacheAction::Stats => {
                    let s = cache.stats();
                    println!("{}", serde_json::to_string_pretty(&s)?);
                }
                CacheAction::Clear { raw, structured } => {
                    let removed = match (raw, structured) {
                        (true, false) => cache.clear_raw(),
                        (false, true) => cache.clear_structured(),
                        _ => cache.clear_all(),
                    };
                    info!(removed, "cache cleared");
                }
            }
        }
        Commands::Status => {
            let s = pipeline::status(&cfg)?;
            println!("{}", serde_json::to_string_pretty(&s)?);
        }
    }
    Ok(())
}
