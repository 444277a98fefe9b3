// src/analyze/transcript.rs
//! Transcript fetch (timed-text XML endpoint) and normalization.

use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";

/// Ordered text segments for an item id; fails when captions are disabled or missing.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_segments(&self, video_id: &str) -> Result<Vec<String>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(rename = "text", default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(rename = "@start", default)]
    start: Option<f64>,
    #[serde(rename = "$text", default)]
    body: String,
}

/// Parse `<transcript><text start=".." dur="..">..</text>..</transcript>` into normalized
/// segments, ordered by start time. Empty segments are dropped.
pub fn parse_timedtext(xml: &str) -> Result<Vec<String>> {
    let t0 = std::time::Instant::now();
    let clean = scrub_entities_for_xml(xml);
    let doc: TimedText =
        from_str(&clean).map_err(|e| Error::Parse(format!("timed-text xml: {e}")))?;

    let mut segs = doc.segments;
    segs.sort_by(|a, b| {
        a.start
            .unwrap_or(0.0)
            .partial_cmp(&b.start.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let out: Vec<String> = segs
        .into_iter()
        .map(|s| normalize_segment(&s.body))
        .filter(|s| !s.is_empty())
        .collect();

    histogram!("transcript_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Named HTML entities are not valid XML; map the common ones before parsing.
fn scrub_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
}

/// Entity decode (captions are often double-escaped), tag strip, whitespace collapse.
pub fn normalize_segment(s: &str) -> String {
    let once = html_escape::decode_html_entities(s);
    let mut out = html_escape::decode_html_entities(&once).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("valid tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Segments joined by single spaces.
pub fn join_segments(segments: &[String]) -> String {
    segments.join(" ")
}

pub struct TimedTextSource {
    http: reqwest::Client,
    base_url: String,
    lang: String,
}

impl TimedTextSource {
    pub fn new(lang: &str) -> Result<Self> {
        Self::with_base_url(TIMEDTEXT_URL, lang)
    }

    pub fn with_base_url(base_url: &str, lang: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vibes-tracker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            lang: lang.to_string(),
        })
    }
}

#[async_trait]
impl TranscriptSource for TimedTextSource {
    async fn fetch_segments(&self, video_id: &str) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("v", video_id), ("lang", self.lang.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(Error::TranscriptUnavailable {
                id: video_id.to_string(),
                detail: "no captions track".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                reason: None,
                message: resp.text().await.unwrap_or_default().chars().take(300).collect(),
            });
        }

        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(Error::TranscriptUnavailable {
                id: video_id.to_string(),
                detail: "captions disabled".into(),
            });
        }
        parse_timedtext(&body)
    }

    fn name(&self) -> &'static str {
        "timedtext"
    }
}
