// src/telemetry.rs
//! Tracing subscriber and the Prometheus recorder.
//!
//! There is no server to scrape, so the exposition text is dumped to a file after each
//! command (node-exporter textfile style) when `paths.metrics_file` is set.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

use crate::dataset::write_atomic;

/// `RUST_LOG` filter (default `info`) to stderr; `LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    // try_init: a second call (tests) is a no-op rather than a panic.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

/// One-time metrics registration (so series carry help text in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("quota_units_total", "Quota units charged to the metered API.");
        describe_counter!("inference_calls_total", "Inference calls issued.");
        describe_counter!(
            "ratelimit_throttled_total",
            "Calls delayed by token-bucket pacing."
        );
        describe_counter!("ratelimit_retries_total", "Retries after a retryable failure.");
        describe_counter!(
            "ratelimit_errors_total",
            "Calls that failed after exhausting retries."
        );
        describe_counter!("cache_hits_total", "Cache hits by namespace.");
        describe_counter!("cache_misses_total", "Cache misses by namespace.");
        describe_counter!("collect_items_total", "Items gathered by collection.");
        describe_counter!(
            "collect_source_errors_total",
            "Handles skipped because they could not be collected."
        );
        describe_counter!("enrich_outcomes_total", "Enrichment results by outcome.");
        describe_histogram!("transcript_parse_ms", "Timed-text parse time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.render().as_bytes())
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}
