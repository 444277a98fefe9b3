// src/config/mod.rs
//! Statically-typed pipeline configuration loaded from one TOML document.
//!
//! Every field has a named default, so a missing file or a partial file still yields a
//! usable config. `validate()` runs eagerly at load time and names the offending field.

pub mod ai;
pub mod rate_limit;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub use ai::AnalysisConfig;
pub use rate_limit::{BatchOperationsConfig, MeteredApiConfig, RateLimitingConfig, ScrapeApiConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "VIBES_CONFIG_PATH";
pub const ENV_YOUTUBE_API_KEY: &str = "YOUTUBE_API_KEY";

fn default_videos_per_channel() -> usize {
    30
}
fn default_page_size() -> u32 {
    50
}
fn default_true() -> bool {
    true
}
fn default_channel_id_cache_path() -> String {
    "data/channel_ids.json".to_string()
}
fn default_playlist_cache_path() -> String {
    "data/playlist_ids_cache.json".to_string()
}
fn default_skip_titles() -> Vec<String> {
    vec!["Private video".to_string(), "Deleted video".to_string()]
}

/// `[ingest]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Per-source cap on collected items.
    #[serde(default = "default_videos_per_channel")]
    pub videos_per_channel: usize,
    /// Playlist page size; the provider caps it at 50.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_true")]
    pub cache_channel_ids: bool,
    #[serde(default = "default_channel_id_cache_path")]
    pub channel_id_cache_path: String,
    #[serde(default = "default_playlist_cache_path")]
    pub playlist_cache_path: String,
    /// Placeholder titles the provider uses for unavailable items.
    #[serde(default = "default_skip_titles")]
    pub skip_titles: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            videos_per_channel: default_videos_per_channel(),
            page_size: default_page_size(),
            cache_channel_ids: true,
            channel_id_cache_path: default_channel_id_cache_path(),
            playlist_cache_path: default_playlist_cache_path(),
            skip_titles: default_skip_titles(),
        }
    }
}

impl IngestConfig {
    fn validate(&self) -> Result<()> {
        if self.videos_per_channel == 0 {
            anyhow::bail!("ingest.videos_per_channel must be >= 1");
        }
        if !(1..=50).contains(&self.page_size) {
            anyhow::bail!("ingest.page_size must be within 1..=50");
        }
        Ok(())
    }
}

/// `[paths]`: every file the pipeline reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "PathsConfig::default_data_dir")]
    pub data_dir: String,
    #[serde(default = "PathsConfig::default_cluster_config")]
    pub cluster_config: String,
    #[serde(default = "PathsConfig::default_cluster_data")]
    pub cluster_data: String,
    #[serde(default = "PathsConfig::default_analyzed_data")]
    pub analyzed_data: String,
    #[serde(default = "PathsConfig::default_metadata_file")]
    pub metadata_file: String,
    #[serde(default = "PathsConfig::default_historical_dir")]
    pub historical_dir: String,
    #[serde(default = "PathsConfig::default_reports_dir")]
    pub reports_dir: String,
    /// Prometheus textfile target; unset disables the export.
    #[serde(default)]
    pub metrics_file: Option<String>,
}

impl PathsConfig {
    fn default_data_dir() -> String {
        "data".to_string()
    }
    fn default_cluster_config() -> String {
        "config/clusters.json".to_string()
    }
    fn default_cluster_data() -> String {
        "data/cluster_data.json".to_string()
    }
    fn default_analyzed_data() -> String {
        "data/analyzed_data.json".to_string()
    }
    fn default_metadata_file() -> String {
        "data/metadata.json".to_string()
    }
    fn default_historical_dir() -> String {
        "data/historical".to_string()
    }
    fn default_reports_dir() -> String {
        "data/reports".to_string()
    }

    /// Re-root every relative path under `root`.
    pub fn rebased(&self, root: &Path) -> Self {
        let j = |p: &str| root.join(p).to_string_lossy().to_string();
        Self {
            data_dir: j(&self.data_dir),
            cluster_config: j(&self.cluster_config),
            cluster_data: j(&self.cluster_data),
            analyzed_data: j(&self.analyzed_data),
            metadata_file: j(&self.metadata_file),
            historical_dir: j(&self.historical_dir),
            reports_dir: j(&self.reports_dir),
            metrics_file: self.metrics_file.as_deref().map(j),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            cluster_config: Self::default_cluster_config(),
            cluster_data: Self::default_cluster_data(),
            analyzed_data: Self::default_analyzed_data(),
            metadata_file: Self::default_metadata_file(),
            historical_dir: Self::default_historical_dir(),
            reports_dir: Self::default_reports_dir(),
            metrics_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl PipelineConfig {
    /// Load from an explicit path. A missing file yields defaults (with a warning);
    /// a present but malformed or invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("loading {}", path.display()))
    }

    /// $VIBES_CONFIG_PATH, then `config/pipeline.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.ingest.validate()?;
        self.analysis.validate()?;
        self.rate_limiting.validate()?;
        Ok(())
    }
}

/// Secrets pulled from the environment (after `.env` is loaded by the binary).
#[derive(Clone)]
pub struct Credentials {
    pub youtube_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("youtube_api_key_len", &self.youtube_api_key.len())
            .finish()
    }
}

impl Credentials {
    /// Fatal when the metered API key is missing: nothing can run without it.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(ENV_YOUTUBE_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing {ENV_YOUTUBE_API_KEY} env var"))?;
        Ok(Self {
            youtube_api_key: key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.ingest.videos_per_channel, 30);
        assert_eq!(cfg.rate_limiting.youtube_api.daily_quota_limit, 10_000);
        assert_eq!(cfg.analysis.min_transcript_chars, 100);
        assert_eq!(cfg.analysis.request_timeout_secs, 120);
        assert_eq!(cfg.rate_limiting.inference.requests_per_second, 2.0);
        assert_eq!(cfg.rate_limiting.inference.burst_size, 10);
        assert_eq!(cfg.rate_limiting.inference.max_retries, 3);
    }

    #[test]
    fn missing_file_uses_inference_pacing_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        let inference = &cfg.rate_limiting.inference;
        assert_eq!(inference.requests_per_second, 2.0);
        assert_eq!(inference.burst_size, 10);
        assert_eq!(inference.max_retries, 3);
        assert_eq!(cfg.rate_limiting.youtube_api.burst_size, 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
[rate_limiting.youtube_api]
burst_size = 2

[analysis]
workers = 4
"#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limiting.youtube_api.burst_size, 2);
        assert_eq!(cfg.rate_limiting.youtube_api.requests_per_second, 1.0);
        assert_eq!(cfg.analysis.workers, 4);
        assert_eq!(cfg.rate_limiting.inference.burst_size, 10);
    }

    #[test]
    fn invalid_fields_fail_fast_with_field_name() {
        let err = PipelineConfig::from_toml_str(
            r#"
[rate_limiting.transcript_api]
min_delay_seconds = 3.0
max_delay_seconds = 1.0
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("rate_limiting.transcript_api.max_delay_seconds"));

        let err = PipelineConfig::from_toml_str("[ingest]\npage_size = 80\n").unwrap_err();
        assert!(format!("{err:#}").contains("ingest.page_size"));

        let err = PipelineConfig::from_toml_str(
            "[rate_limiting.youtube_api]\nrequests_per_second = 0.0\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("requests_per_second"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(PipelineConfig::from_toml_str("[ingest]\nvideos_per_channel = \"many\"\n").is_err());
    }

    #[test]
    fn rebased_paths_stay_under_root() {
        let root = Path::new("/tmp/vt");
        let p = PathsConfig::default().rebased(root);
        assert!(p.cluster_data.starts_with("/tmp/vt"));
        assert!(p.metrics_file.is_none());
    }
}
