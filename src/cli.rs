// src/cli.rs
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "vibes-tracker",
    version,
    about = "Quota-aware YouTube collection and transcript enrichment pipeline"
)]
pub struct Cli {
    /// Pipeline config (TOML). Defaults to $VIBES_CONFIG_PATH, then config/pipeline.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect recent uploads for every configured cluster.
    Collect(ModeArgs),
    /// Fetch transcripts and run structured inference over the collected items.
    Enrich(EnrichArgs),
    /// Collect, enrich, then snapshot.
    Pipeline(PipelineArgs),
    /// Copy both datasets into today's dated snapshot directory.
    Snapshot,
    /// Top items of one UTC day by views, with per-cluster transcript text.
    DailyReport(DailyReportArgs),
    /// Inspect or clear the content cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Run metadata, dataset sizes, cache contents and snapshots.
    Status,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ModeArgs {
    /// Only process what is new since the last successful run.
    #[arg(long, conflicts_with = "full_refresh")]
    pub incremental: bool,

    /// Ignore earlier runs and process everything.
    #[arg(long)]
    pub full_refresh: bool,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct EnrichArgs {
    #[command(flatten)]
    pub mode: ModeArgs,

    /// Concurrent enrichment workers (defaults to analysis.workers).
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PipelineArgs {
    #[arg(long)]
    pub incremental: bool,

    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DailyReportArgs {
    /// UTC date, YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    Stats,
    Clear {
        /// Only transcripts.
        #[arg(long, conflicts_with = "structured")]
        raw: bool,
        /// Only inference results.
        #[arg(long)]
        structured: bool,
    },
}
