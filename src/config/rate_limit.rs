// src/config/rate_limit.rs
//! `[rate_limiting.*]` sections: one per upstream budget.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

/// Token-bucket pacing + exponential backoff (metered API, inference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteredApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hard daily budget in provider units. Ignored for inference.
    #[serde(default = "MeteredApiConfig::default_daily_quota_limit")]
    pub daily_quota_limit: u64,
    #[serde(default = "MeteredApiConfig::default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "MeteredApiConfig::default_burst_size")]
    pub burst_size: u32,
    /// Total attempts, first call included.
    #[serde(default = "MeteredApiConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "MeteredApiConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "MeteredApiConfig::default_min_delay_seconds")]
    pub min_delay_seconds: f64,
    #[serde(default = "MeteredApiConfig::default_max_delay_seconds")]
    pub max_delay_seconds: f64,
}

impl MeteredApiConfig {
    fn default_daily_quota_limit() -> u64 {
        10_000
    }
    fn default_requests_per_second() -> f64 {
        1.0
    }
    fn default_burst_size() -> u32 {
        5
    }
    fn default_max_retries() -> u32 {
        5
    }
    fn default_backoff_multiplier() -> f64 {
        2.0
    }
    fn default_min_delay_seconds() -> f64 {
        1.0
    }
    fn default_max_delay_seconds() -> f64 {
        60.0
    }

    /// Inference defaults: local backend, so pacing is loose and budget unused.
    pub fn inference_default() -> Self {
        Self {
            daily_quota_limit: 0,
            requests_per_second: 2.0,
            burst_size: 10,
            max_retries: 3,
            ..Self::default()
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_seconds)
    }

    pub(crate) fn validate(&self, section: &str) -> anyhow::Result<()> {
        if !(self.requests_per_second > 0.0) || !self.requests_per_second.is_finite() {
            anyhow::bail!("{section}.requests_per_second must be a positive number");
        }
        if self.burst_size == 0 {
            anyhow::bail!("{section}.burst_size must be >= 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("{section}.max_retries must be >= 1 (it counts the first attempt)");
        }
        if self.backoff_multiplier <= 0.0 {
            anyhow::bail!("{section}.backoff_multiplier must be > 0");
        }
        validate_delays(section, self.min_delay_seconds, self.max_delay_seconds)
    }
}

impl Default for MeteredApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_quota_limit: Self::default_daily_quota_limit(),
            requests_per_second: Self::default_requests_per_second(),
            burst_size: Self::default_burst_size(),
            max_retries: Self::default_max_retries(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            min_delay_seconds: Self::default_min_delay_seconds(),
            max_delay_seconds: Self::default_max_delay_seconds(),
        }
    }
}

/// Jittered fixed-window pacing for the scraping-style transcript endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "ScrapeApiConfig::default_min_delay_seconds")]
    pub min_delay_seconds: f64,
    #[serde(default = "ScrapeApiConfig::default_max_delay_seconds")]
    pub max_delay_seconds: f64,
    /// Fraction of the window midpoint added as random jitter, 0.0..=1.0.
    #[serde(default = "ScrapeApiConfig::default_delay_jitter")]
    pub delay_jitter: f64,
    #[serde(default = "ScrapeApiConfig::default_max_retries")]
    pub max_retries: u32,
}

impl ScrapeApiConfig {
    fn default_min_delay_seconds() -> f64 {
        0.5
    }
    fn default_max_delay_seconds() -> f64 {
        2.0
    }
    fn default_delay_jitter() -> f64 {
        0.3
    }
    fn default_max_retries() -> u32 {
        3
    }

    pub(crate) fn validate(&self, section: &str) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.delay_jitter) {
            anyhow::bail!("{section}.delay_jitter must be within 0.0..=1.0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("{section}.max_retries must be >= 1");
        }
        validate_delays(section, self.min_delay_seconds, self.max_delay_seconds)
    }
}

impl Default for ScrapeApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_seconds: Self::default_min_delay_seconds(),
            max_delay_seconds: Self::default_max_delay_seconds(),
            delay_jitter: Self::default_delay_jitter(),
            max_retries: Self::default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationsConfig {
    #[serde(default = "BatchOperationsConfig::default_delay_between_batches")]
    pub delay_between_batches: f64,
    #[serde(default = "BatchOperationsConfig::default_stats_batch_size")]
    pub stats_batch_size: usize,
}

impl BatchOperationsConfig {
    fn default_delay_between_batches() -> f64 {
        1.0
    }
    fn default_stats_batch_size() -> usize {
        50
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_batches.max(0.0))
    }
}

impl Default for BatchOperationsConfig {
    fn default() -> Self {
        Self {
            delay_between_batches: Self::default_delay_between_batches(),
            stats_batch_size: Self::default_stats_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default)]
    pub youtube_api: MeteredApiConfig,
    #[serde(default)]
    pub transcript_api: ScrapeApiConfig,
    #[serde(default = "MeteredApiConfig::inference_default")]
    pub inference: MeteredApiConfig,
    #[serde(default)]
    pub batch_operations: BatchOperationsConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            youtube_api: MeteredApiConfig::default(),
            transcript_api: ScrapeApiConfig::default(),
            inference: MeteredApiConfig::inference_default(),
            batch_operations: BatchOperationsConfig::default(),
        }
    }
}

impl RateLimitingConfig {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        self.youtube_api
            .validate("rate_limiting.youtube_api")?;
        if self.youtube_api.daily_quota_limit == 0 {
            anyhow::bail!("rate_limiting.youtube_api.daily_quota_limit must be > 0");
        }
        self.transcript_api
            .validate("rate_limiting.transcript_api")?;
        self.inference.validate("rate_limiting.inference")?;
        let batch = &self.batch_operations;
        if batch.stats_batch_size == 0 || batch.stats_batch_size > 50 {
            anyhow::bail!("rate_limiting.batch_operations.stats_batch_size must be within 1..=50");
        }
        if batch.delay_between_batches < 0.0 {
            anyhow::bail!("rate_limiting.batch_operations.delay_between_batches must be >= 0");
        }
        Ok(())
    }
}

fn validate_delays(section: &str, min: f64, max: f64) -> anyhow::Result<()> {
    if !(min >= 0.0) || !min.is_finite() {
        anyhow::bail!("{section}.min_delay_seconds must be >= 0");
    }
    if !max.is_finite() || max < min {
        anyhow::bail!("{section}.max_delay_seconds ({max}) must be >= min_delay_seconds ({min})");
    }
    Ok(())
}
