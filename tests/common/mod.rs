// tests/common/mod.rs
// In-process fakes for the three upstreams. Every fake counts its calls.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use vibes_tracker::config::{PipelineConfig, RateLimitingConfig};
use vibes_tracker::ingest::types::{PlaylistEntry, PlaylistPage, VideoApi};
use vibes_tracker::{Error, Result};

pub const GOOD_ANALYSIS: &str = r#"{
    "core_themes": ["Border policy", "Inflation", "Elections"],
    "theme_categories": ["Political Issues", "Economic Topics", "Political Issues"],
    "overall_sentiment": "Negative",
    "framing": "alarmist",
    "named_entities": ["Congress"],
    "one_sentence_summary": "The host argues the economy is sliding."
}"#;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()
}

/// `count` playlist entries, newest first, one hour apart, ids `{prefix}-{n}`.
pub fn entries(prefix: &str, count: usize, newest: DateTime<Utc>) -> Vec<PlaylistEntry> {
    (0..count)
        .map(|n| PlaylistEntry {
            video_id: format!("{prefix}-{n}"),
            title: format!("video {prefix} {n}"),
            published_at: newest - Duration::hours(n as i64),
            channel_title: Some(format!("channel {prefix}")),
        })
        .collect()
}

#[derive(Default)]
pub struct MockVideoApi {
    pub channels: HashMap<String, String>,
    pub playlists: HashMap<String, String>,
    /// Playlist id -> pages; page N is requested with token `page-N`.
    pub pages: HashMap<String, Vec<Vec<PlaylistEntry>>>,
    pub views: HashMap<String, u64>,
    /// (playlist id, page index) -> (status, remaining failures) returned before the page.
    pub page_failures: Mutex<HashMap<(String, usize), (u16, u32)>>,
    pub search_calls: AtomicU64,
    pub uploads_calls: AtomicU64,
    pub page_calls: AtomicU64,
    pub stats_calls: AtomicU64,
}

impl MockVideoApi {
    /// One handle -> `channel` -> `uploads-{channel}` with the given pages.
    pub fn with_channel(mut self, handle: &str, channel: &str, pages: Vec<Vec<PlaylistEntry>>) -> Self {
        let playlist = format!("uploads-{channel}");
        self.channels.insert(handle.to_string(), channel.to_string());
        self.playlists.insert(channel.to_string(), playlist.clone());
        self.pages.insert(playlist, pages);
        self
    }

    /// Fail page `page` of `channel`'s uploads with `status`, `times` times in a row.
    pub fn with_page_failure(self, channel: &str, page: usize, status: u16, times: u32) -> Self {
        self.page_failures
            .lock()
            .unwrap()
            .insert((format!("uploads-{channel}"), page), (status, times));
        self
    }

    pub fn searches(&self) -> u64 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn uploads_lookups(&self) -> u64 {
        self.uploads_calls.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> u64 {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoApi for MockVideoApi {
    async fn search_channel(&self, handle: &str) -> Result<Option<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.channels.get(handle).cloned())
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>> {
        self.uploads_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.playlists.get(channel_id).cloned())
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        _max_results: u32,
    ) -> Result<PlaylistPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let pages = self.pages.get(playlist_id).ok_or_else(|| Error::Upstream {
            status: 404,
            reason: Some("playlistNotFound".into()),
            message: playlist_id.to_string(),
        })?;
        let idx = match page_token {
            None => 0,
            Some(t) => t
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::Parse(format!("bad token {t}")))?,
        };
        if let Some((status, remaining)) = self
            .page_failures
            .lock()
            .unwrap()
            .get_mut(&(playlist_id.to_string(), idx))
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Upstream {
                    status: *status,
                    reason: None,
                    message: format!("injected failure on page {idx}"),
                });
            }
        }
        let entries = pages.get(idx).cloned().unwrap_or_default();
        let next_page_token = (idx + 1 < pages.len()).then(|| format!("page-{}", idx + 1));
        Ok(PlaylistPage {
            entries,
            next_page_token,
        })
    }

    async fn video_statistics(&self, ids: &[String]) -> Result<HashMap<String, u64>> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| self.views.get(id).map(|v| (id.clone(), *v)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock-video"
    }
}

/// Transcript fake: ids without an entry have no captions.
#[derive(Default)]
pub struct MockTranscripts {
    pub texts: Mutex<HashMap<String, String>>,
    pub calls: AtomicU64,
}

impl MockTranscripts {
    pub fn with(self, id: &str, text: &str) -> Self {
        self.texts
            .lock()
            .unwrap()
            .insert(id.to_string(), text.to_string());
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl vibes_tracker::analyze::transcript::TranscriptSource for MockTranscripts {
    async fn fetch_segments(&self, video_id: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.texts.lock().unwrap().get(video_id) {
            Some(t) => Ok(vec![t.clone()]),
            None => Err(Error::TranscriptUnavailable {
                id: video_id.to_string(),
                detail: "captions disabled".into(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock-transcripts"
    }
}

/// Rate limits that keep the same shape but don't slow tests down.
pub fn fast_limits() -> RateLimitingConfig {
    let mut rl = RateLimitingConfig::default();
    rl.youtube_api.requests_per_second = 1_000.0;
    rl.youtube_api.burst_size = 100;
    rl.youtube_api.min_delay_seconds = 0.001;
    rl.youtube_api.max_delay_seconds = 0.002;
    rl.inference.requests_per_second = 1_000.0;
    rl.inference.burst_size = 100;
    rl.transcript_api.min_delay_seconds = 0.0;
    rl.transcript_api.max_delay_seconds = 0.0;
    rl.batch_operations.delay_between_batches = 0.0;
    rl
}

/// Config rooted in `root`, with fast limits and persistent id caches under it.
pub fn test_config(root: &std::path::Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.paths = cfg.paths.rebased(root);
    cfg.ingest.videos_per_channel = 100;
    cfg.ingest.channel_id_cache_path = root.join("data/channel_ids.json").to_string_lossy().to_string();
    cfg.ingest.playlist_cache_path = root.join("data/playlist_ids_cache.json").to_string_lossy().to_string();
    cfg.analysis.cache_dir = root.join("data/cache").to_string_lossy().to_string();
    cfg.rate_limiting = fast_limits();
    cfg
}
