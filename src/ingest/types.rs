// src/ingest/types.rs
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;

/// One entry of a channel's uploads playlist.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub video_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub channel_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistPage {
    pub entries: Vec<PlaylistEntry>,
    pub next_page_token: Option<String>,
}

/// Read-only calls against the metered video API. Implementations do not touch the
/// quota ledger; costs are charged by the caller before each request.
#[async_trait::async_trait]
pub trait VideoApi: Send + Sync {
    /// Search for a channel by handle; `None` when nothing matches.
    async fn search_channel(&self, handle: &str) -> Result<Option<String>>;
    /// Uploads playlist id of a channel; `None` when the channel is gone.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>>;
    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<PlaylistPage>;
    /// View counts for up to 50 ids; ids without statistics are absent from the map.
    async fn video_statistics(&self, ids: &[String]) -> Result<HashMap<String, u64>>;
    fn name(&self) -> &'static str;
}
