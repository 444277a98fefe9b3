// src/ingest/youtube.rs
//! YouTube Data API v3 client (read-only subset used by collection and reports).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ingest::types::{PlaylistEntry, PlaylistPage, VideoApi};

const BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

pub struct YoutubeClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YoutubeClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vibes-tracker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, resource: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{resource}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(resp.json().await?)
    }
}

/// Map an error response onto `Error::Upstream`, keeping the provider's reason code
/// (`errors[0].reason`) so 403 quota/rate signals can be told apart.
pub fn api_error(status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: String,
        #[serde(default)]
        errors: Vec<ErrorDetail>,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        reason: Option<String>,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) => Error::Upstream {
            status,
            reason: env.error.errors.into_iter().find_map(|d| d.reason),
            message: env.error.message,
        },
        Err(_) => Error::Upstream {
            status,
            reason: None,
            message: body.chars().take(300).collect(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}
#[derive(Debug, Deserialize)]
struct SearchItem {
    snippet: SearchSnippet,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ContentDetails,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    related_playlists: RelatedPlaylists,
}
#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}
#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    published_at: DateTime<Utc>,
    channel_title: Option<String>,
    resource_id: ResourceId,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}
#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: Option<Statistics>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    /// Counts arrive as decimal strings.
    view_count: Option<String>,
}

fn into_page(resp: PlaylistItemsResponse) -> PlaylistPage {
    let entries = resp
        .items
        .into_iter()
        .filter_map(|it| {
            let s = it.snippet;
            Some(PlaylistEntry {
                video_id: s.resource_id.video_id?,
                title: s.title,
                published_at: s.published_at,
                channel_title: s.channel_title,
            })
        })
        .collect();
    PlaylistPage {
        entries,
        next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
    }
}

#[async_trait]
impl VideoApi for YoutubeClient {
    async fn search_channel(&self, handle: &str) -> Result<Option<String>> {
        let resp: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("q", handle),
                    ("maxResults", "1"),
                ],
            )
            .await?;
        Ok(resp.items.into_iter().next().map(|i| i.snippet.channel_id))
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>> {
        let resp: ChannelsResponse = self
            .get("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;
        Ok(resp
            .items
            .into_iter()
            .next()
            .and_then(|c| c.content_details.related_playlists.uploads))
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<PlaylistPage> {
        let max = max_results.clamp(1, 50).to_string();
        let mut query = vec![
            ("part", "snippet"),
            ("playlistId", playlist_id),
            ("maxResults", max.as_str()),
        ];
        if let Some(tok) = page_token {
            query.push(("pageToken", tok));
        }
        let resp: PlaylistItemsResponse = self.get("playlistItems", &query).await?;
        Ok(into_page(resp))
    }

    async fn video_statistics(&self, ids: &[String]) -> Result<HashMap<String, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.join(",");
        let resp: VideosResponse = self
            .get("videos", &[("part", "statistics"), ("id", joined.as_str())])
            .await?;
        Ok(resp
            .items
            .into_iter()
            .filter_map(|v| {
                let views = v.statistics?.view_count?.parse::<u64>().ok()?;
                Some((v.id, views))
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "youtube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_reason_is_extracted() {
        let body = r#"{"error":{"code":403,"message":"The request cannot be completed because you have exceeded your quota.","errors":[{"message":"x","domain":"youtube.quota","reason":"quotaExceeded"}]}}"#;
        let err = api_error(403, body);
        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
    }

    #[test]
    fn non_json_error_body_keeps_status() {
        let err = api_error(502, "<html>Bad Gateway</html>");
        assert!(matches!(err, Error::Upstream { status: 502, reason: None, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn playlist_page_skips_items_without_video_id() {
        let body = r#"{
            "nextPageToken": "CAUQAA",
            "items": [
                {"snippet": {"title": "One", "publishedAt": "2025-03-01T10:00:00Z",
                             "channelTitle": "Chan", "resourceId": {"videoId": "v1"}}},
                {"snippet": {"title": "Broken", "publishedAt": "2025-03-01T09:00:00Z",
                             "resourceId": {}}}
            ]
        }"#;
        let resp: PlaylistItemsResponse = serde_json::from_str(body).unwrap();
        let page = into_page(resp);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].video_id, "v1");
        assert_eq!(page.entries[0].channel_title.as_deref(), Some("Chan"));
        assert_eq!(page.next_page_token.as_deref(), Some("CAUQAA"));
    }

    #[test]
    fn view_counts_parse_from_strings() {
        let body = r#"{"items":[{"id":"a","statistics":{"viewCount":"1200"}},{"id":"b"}]}"#;
        let resp: VideosResponse = serde_json::from_str(body).unwrap();
        let views: Vec<(String, u64)> = resp
            .items
            .into_iter()
            .filter_map(|v| Some((v.id, v.statistics?.view_count?.parse().ok()?)))
            .collect();
        assert_eq!(views, vec![("a".to_string(), 1200)]);
    }
}
