// src/analyze/ai_adapter.rs
//! Inference adapter: provider abstraction, OpenAI-compatible backend, and the
//! cache-first client that validates before it caches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::analyze::schema::{self, Analysis};
use crate::cache::ContentCache;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::ratelimit::MeteredLimiter;

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system: String,
    pub user: String,
    /// `response_format` payload; backends without support may ignore it.
    pub response_format: serde_json::Value,
}

/// Low-level provider: does the real remote call and returns the raw message content.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(&self, req: &InferenceRequest) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Chat Completions against any OpenAI-compatible endpoint (Ollama, vLLM, hosted).
pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(cfg: &AnalysisConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vibes-tracker/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.resolved_api_key(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl InferenceProvider for OpenAiCompatibleProvider {
    async fn complete(&self, req: &InferenceRequest) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: &'a serde_json::Value,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &req.system,
                },
                Msg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: self.temperature,
            response_format: &req.response_format,
        };

        let mut call = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let resp = call.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                reason: None,
                message: text.chars().take(300).collect(),
            });
        }
        let parsed: Resp = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::InvalidOutput("empty completion".into()))
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

/// Deterministic provider for tests and dry runs: replays queued responses, then
/// repeats the fixed one. Counts every call.
pub struct MockProvider {
    pub fixed: String,
    queued: Mutex<Vec<String>>,
    calls: AtomicU64,
}

impl MockProvider {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
            queued: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Responses returned (in order) before falling back to `fixed`.
    pub fn with_queue(fixed: impl Into<String>, queue: Vec<String>) -> Self {
        let mock = Self::new(fixed);
        {
            let mut q = mock.queued.lock().expect("mock queue mutex poisoned");
            *q = queue.into_iter().rev().collect();
        }
        mock
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    async fn complete(&self, _req: &InferenceRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .queued
            .lock()
            .expect("mock queue mutex poisoned")
            .pop();
        Ok(next.unwrap_or_else(|| self.fixed.clone()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Prompt
// ------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You analyze video transcripts. Reply with one JSON object that \
follows the provided schema exactly. No prose, no markdown.";

/// Cut at a char boundary so multi-byte text never splits.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn build_request(title: &str, cluster: &str, transcript: &str, max_chars: usize) -> InferenceRequest {
    let user = format!(
        "Video title: \"{title}\"\nChannel cluster: {cluster}\n\n\
         core_themes: 3-5 main topics.\n\
         theme_categories: one per theme, from {categories}.\n\
         overall_sentiment: one of {sentiments}.\n\
         framing: one of {framings}.\n\
         named_entities: up to 5 key people, organizations or events.\n\
         one_sentence_summary: a single concise sentence.\n\n\
         Transcript:\n{body}",
        categories = schema::ThemeCategory::ALL.join(", "),
        sentiments = schema::Sentiment::ALL.join(", "),
        framings = schema::Framing::ALL.join(", "),
        body = truncate_chars(transcript, max_chars),
    );
    InferenceRequest {
        system: SYSTEM_PROMPT.to_string(),
        user,
        response_format: schema::response_format(),
    }
}

// ------------------------------------------------------------
// Cache-first client
// ------------------------------------------------------------

pub struct InferenceClient {
    provider: Arc<dyn InferenceProvider>,
    limiter: Arc<MeteredLimiter>,
    cache: Arc<ContentCache>,
    max_chars: usize,
}

impl InferenceClient {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        limiter: Arc<MeteredLimiter>,
        cache: Arc<ContentCache>,
        max_chars: usize,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            max_chars,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Cached result if present; otherwise one paced inference call whose output must
    /// pass schema validation before it is cached and returned.
    pub async fn analyze(
        &self,
        video_id: &str,
        title: &str,
        cluster: &str,
        transcript: &str,
    ) -> Result<Analysis> {
        if let Some(hit) = self.cache.get_structured(video_id) {
            return Ok(hit);
        }

        let req = build_request(title, cluster, transcript, self.max_chars);
        let provider = &self.provider;
        let ledger = self.limiter.ledger();
        let req_ref = &req;
        let raw = self
            .limiter
            .call("inference", || async move {
                ledger.record_inference(video_id);
                provider.complete(req_ref).await
            })
            .await?;

        let analysis = schema::validate_response(&raw).map_err(|e| {
            warn!(video_id, provider = self.provider.name(), error = %e, "rejecting inference output");
            e
        })?;
        if self.cache.put_structured(video_id, &analysis) {
            debug!(video_id, "analysis cached");
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("žluťoučký", 3), "žlu");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn request_carries_schema_and_truncated_transcript() {
        let req = build_request("T", "Left", &"x".repeat(50), 10);
        assert!(req.user.ends_with(&"x".repeat(10)));
        assert!(!req.user.contains(&"x".repeat(11)));
        assert_eq!(req.response_format["type"], "json_schema");
        assert!(req.user.contains("Technology & Science"));
    }

    #[tokio::test]
    async fn mock_replays_queue_then_fixed() {
        let mock = MockProvider::with_queue("fixed", vec!["one".into(), "two".into()]);
        let req = build_request("t", "c", "body", 100);
        assert_eq!(mock.complete(&req).await.unwrap(), "one");
        assert_eq!(mock.complete(&req).await.unwrap(), "two");
        assert_eq!(mock.complete(&req).await.unwrap(), "fixed");
        assert_eq!(mock.calls(), 3);
    }
}
