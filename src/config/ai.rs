// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

pub const ENV_INFERENCE_API_KEY: &str = "INFERENCE_API_KEY";

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cache_dir() -> String {
    "data/cache".to_string()
}
fn default_min_transcript_chars() -> usize {
    100
}
fn default_max_transcript_chars() -> usize {
    64_000
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_workers() -> usize {
    10
}
fn default_temperature() -> f32 {
    0.2
}
fn default_api_key() -> String {
    "ENV".to_string()
}

/// Inference backend + enrichment settings (`[analysis]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// OpenAI-compatible base URL (local Ollama / vLLM / hosted).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from INFERENCE_API_KEY (may be absent for local backends).
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Transcripts shorter than this are unenrichable.
    #[serde(default = "default_min_transcript_chars")]
    pub min_transcript_chars: usize,
    /// Prompt budget; longer transcripts are truncated at a char boundary.
    #[serde(default = "default_max_transcript_chars")]
    pub max_transcript_chars: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: default_api_key(),
            enable_caching: true,
            cache_dir: default_cache_dir(),
            min_transcript_chars: default_min_transcript_chars(),
            max_transcript_chars: default_max_transcript_chars(),
            request_timeout_secs: default_request_timeout_secs(),
            workers: default_workers(),
            temperature: default_temperature(),
        }
    }
}

impl AnalysisConfig {
    /// Resolve the bearer token. `None` is fine for local inference.
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.trim();
        if raw.eq_ignore_ascii_case("env") {
            env::var(ENV_INFERENCE_API_KEY)
                .ok()
                .filter(|k| !k.trim().is_empty())
        } else if raw.is_empty() {
            None
        } else {
            Some(raw.to_string())
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("analysis.base_url must not be empty");
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("analysis.model must not be empty");
        }
        if self.workers == 0 {
            anyhow::bail!("analysis.workers must be >= 1");
        }
        if self.max_transcript_chars < self.min_transcript_chars {
            anyhow::bail!(
                "analysis.max_transcript_chars ({}) must be >= min_transcript_chars ({})",
                self.max_transcript_chars,
                self.min_transcript_chars
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("analysis.request_timeout_secs must be > 0");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("analysis.temperature must be within 0.0..=2.0");
        }
        Ok(())
    }
}
