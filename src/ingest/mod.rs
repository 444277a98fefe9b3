// src/ingest/mod.rs
//! Collection stage: handle -> channel id -> uploads playlist -> paginated items,
//! tagged with their cluster. Sequential on purpose so every metered call goes through
//! the one shared limiter in a predictable order.

pub mod config;
pub mod id_cache;
pub mod types;
pub mod youtube;

use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{BatchOperationsConfig, IngestConfig};
use crate::dataset::Item;
use crate::error::{Error, Result};
use crate::ingest::config::ClusterMap;
use crate::ingest::id_cache::IdCache;
use crate::ingest::types::{PlaylistEntry, VideoApi};
use crate::quota::{QuotaCost, QuotaLedger};
use crate::ratelimit::MeteredLimiter;

/// A handle (or one of its pages) that could not be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub cluster: String,
    pub handle: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CollectionOutcome {
    pub items: Vec<Item>,
    /// The daily budget ran out mid-run; `items` holds everything gathered before that.
    pub quota_exhausted: bool,
    pub failures: Vec<SourceFailure>,
}

/// Items published at or after `since` (boundary inclusive).
pub fn filter_since(items: Vec<Item>, since: DateTime<Utc>) -> Vec<Item> {
    items
        .into_iter()
        .filter(|i| i.published_at >= since)
        .collect()
}

pub struct Collector {
    api: Arc<dyn VideoApi>,
    limiter: Arc<MeteredLimiter>,
    ledger: Arc<QuotaLedger>,
    channel_ids: IdCache,
    playlists: IdCache,
    cfg: IngestConfig,
}

impl Collector {
    /// Id caches are loaded from the configured paths, or kept in memory when
    /// `cache_channel_ids` is off.
    pub fn new(api: Arc<dyn VideoApi>, limiter: Arc<MeteredLimiter>, cfg: &IngestConfig) -> Self {
        let (channel_ids, playlists) = if cfg.cache_channel_ids {
            (
                IdCache::load(&cfg.channel_id_cache_path),
                IdCache::load(&cfg.playlist_cache_path),
            )
        } else {
            (IdCache::in_memory(), IdCache::in_memory())
        };
        Self::with_caches(api, limiter, cfg, channel_ids, playlists)
    }

    pub fn with_caches(
        api: Arc<dyn VideoApi>,
        limiter: Arc<MeteredLimiter>,
        cfg: &IngestConfig,
        channel_ids: IdCache,
        playlists: IdCache,
    ) -> Self {
        let ledger = Arc::clone(limiter.ledger());
        Self {
            api,
            limiter,
            ledger,
            channel_ids,
            playlists,
            cfg: cfg.clone(),
        }
    }

    /// Cache hit costs nothing; a miss costs one search (100 units) and is cached.
    pub async fn resolve_channel_id(&mut self, handle: &str) -> Result<Option<String>> {
        if let Some(cid) = self.channel_ids.get(handle) {
            debug!(handle, channel_id = cid, "channel id cache hit");
            return Ok(Some(cid.to_string()));
        }

        info!(handle, cost = QuotaCost::SEARCH, "resolving handle (cache miss)");
        let api = &self.api;
        let ledger = &self.ledger;
        let found = self
            .limiter
            .call("search.list", || async move {
                // Charged per attempt and before sending, so the ledger can run ahead of
                // what the provider actually bills.
                ledger.record(QuotaCost::SEARCH, "search.list")?;
                api.search_channel(handle).await
            })
            .await?;

        if let Some(cid) = &found {
            self.channel_ids.insert(handle, cid);
        }
        Ok(found)
    }

    /// Cache hit costs nothing; a miss costs one channels.list call.
    pub async fn uploads_playlist(&mut self, channel_id: &str) -> Result<Option<String>> {
        if let Some(pid) = self.playlists.get(channel_id) {
            return Ok(Some(pid.to_string()));
        }
        let api = &self.api;
        let ledger = &self.ledger;
        let found = self
            .limiter
            .call("channels.list", || async move {
                ledger.record(QuotaCost::CHANNEL_LOOKUP, "channels.list")?;
                api.uploads_playlist(channel_id).await
            })
            .await?;
        if let Some(pid) = &found {
            self.playlists.insert(channel_id, pid);
        }
        Ok(found)
    }

    /// Page through a channel's uploads until the per-source cap or the end of the
    /// playlist. A failed page (quota exhaustion included) ends pagination for this
    /// channel; the items gathered so far come back together with that page's error.
    pub async fn get_recent_videos(
        &mut self,
        channel_id: &str,
        handle: &str,
        cluster: &str,
        since: Option<DateTime<Utc>>,
        collected_at: DateTime<Utc>,
    ) -> Result<(Vec<Item>, Option<Error>)> {
        let Some(playlist_id) = self.uploads_playlist(channel_id).await? else {
            return Err(Error::Upstream {
                status: 404,
                reason: None,
                message: format!("no uploads playlist for channel {channel_id}"),
            });
        };

        let cap = self.cfg.videos_per_channel;
        let mut entries: Vec<PlaylistEntry> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page_error = None;

        while entries.len() < cap {
            let remaining = (cap - entries.len()).min(self.cfg.page_size as usize) as u32;
            let api = &self.api;
            let ledger = &self.ledger;
            let pid = playlist_id.as_str();
            let token = page_token.as_deref();
            let page = match self
                .limiter
                .call("playlistItems.list", || async move {
                    ledger.record(QuotaCost::PLAYLIST_PAGE, "playlistItems.list")?;
                    api.playlist_page(pid, token, remaining).await
                })
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(handle, error = %e, "playlist page failed, keeping earlier pages");
                    page_error = Some(e);
                    break;
                }
            };

            let oldest_on_page = page.entries.iter().map(|e| e.published_at).min();
            for entry in page.entries {
                if self.cfg.skip_titles.iter().any(|t| t == &entry.title) {
                    continue;
                }
                if entries.len() < cap {
                    entries.push(entry);
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
            // Uploads are newest first: once a page reaches past `since`, later pages can't match.
            if let (Some(since), Some(oldest)) = (since, oldest_on_page) {
                if oldest < since {
                    break;
                }
            }
        }

        let items: Vec<Item> = entries
            .into_iter()
            .map(|e| Item {
                url: Item::watch_url(&e.video_id),
                video_id: e.video_id,
                title: e.title,
                published_at: e.published_at,
                cluster: cluster.to_string(),
                channel_handle: handle.to_string(),
                channel_title: e.channel_title,
                collected_at,
                raw_text: None,
                analysis: None,
            })
            .collect();

        let items = match since {
            Some(since) => filter_since(items, since),
            None => items,
        };
        Ok((items, page_error))
    }

    /// Collect every handle of every cluster. Per-handle failures are recorded and
    /// skipped; quota exhaustion stops the run. Id caches are saved whatever happens.
    pub async fn collect(
        &mut self,
        clusters: &ClusterMap,
        since: Option<DateTime<Utc>>,
    ) -> CollectionOutcome {
        let outcome = self.collect_inner(clusters, since).await;
        self.flush_caches();
        outcome
    }

    async fn collect_inner(
        &mut self,
        clusters: &ClusterMap,
        since: Option<DateTime<Utc>>,
    ) -> CollectionOutcome {
        let collected_at = Utc::now();
        let mut out = CollectionOutcome::default();
        info!(
            clusters = clusters.len(),
            incremental = since.is_some(),
            "starting collection"
        );

        'clusters: for (cluster, handles) in clusters {
            info!(cluster = %cluster, handles = handles.len(), "processing cluster");
            for handle in handles {
                let res = self.collect_handle(cluster, handle, since, collected_at).await;
                match res {
                    Ok((items, page_error)) => {
                        info!(cluster = %cluster, handle = %handle, items = items.len(), "collected");
                        counter!("collect_items_total").increment(items.len() as u64);
                        out.items.extend(items);
                        if let Some(e) = page_error {
                            out.failures.push(failure(cluster, handle, &e));
                            if e.is_quota_exceeded() {
                                error!(handle = %handle, "quota exhausted, stopping collection");
                                out.quota_exhausted = true;
                                break 'clusters;
                            }
                        }
                    }
                    Err(e) if e.is_quota_exceeded() => {
                        error!(handle = %handle, error = %e, "quota exhausted, stopping collection");
                        out.quota_exhausted = true;
                        out.failures.push(failure(cluster, handle, &e));
                        break 'clusters;
                    }
                    Err(e) => {
                        warn!(cluster = %cluster, handle = %handle, error = %e, "skipping handle");
                        counter!("collect_source_errors_total").increment(1);
                        out.failures.push(failure(cluster, handle, &e));
                    }
                }
            }
        }

        info!(
            items = out.items.len(),
            failures = out.failures.len(),
            quota_exhausted = out.quota_exhausted,
            "collection finished"
        );
        out
    }

    async fn collect_handle(
        &mut self,
        cluster: &str,
        handle: &str,
        since: Option<DateTime<Utc>>,
        collected_at: DateTime<Utc>,
    ) -> Result<(Vec<Item>, Option<Error>)> {
        let Some(cid) = self.resolve_channel_id(handle).await? else {
            return Err(Error::Upstream {
                status: 404,
                reason: None,
                message: format!("handle {handle} did not resolve to a channel"),
            });
        };
        self.get_recent_videos(&cid, handle, cluster, since, collected_at)
            .await
    }

    fn flush_caches(&mut self) {
        if let Err(e) = self.channel_ids.save() {
            error!(error = %e, "saving channel id cache failed");
        }
        if let Err(e) = self.playlists.save() {
            error!(error = %e, "saving playlist cache failed");
        }
    }

    pub fn channel_id_cache(&self) -> &IdCache {
        &self.channel_ids
    }

    pub fn playlist_cache(&self) -> &IdCache {
        &self.playlists
    }
}

fn failure(cluster: &str, handle: &str, e: &Error) -> SourceFailure {
    SourceFailure {
        cluster: cluster.to_string(),
        handle: handle.to_string(),
        reason: e.to_string(),
    }
}

/// View counts for `ids` in batches (1 unit each, charged per attempt before the
/// request) with a pause between batches.
/// A failed batch is logged and skipped; quota exhaustion stops early with what was
/// fetched so far.
pub async fn fetch_view_counts(
    api: &dyn VideoApi,
    limiter: &MeteredLimiter,
    ids: &[String],
    batch: &BatchOperationsConfig,
) -> HashMap<String, u64> {
    let ledger = limiter.ledger();
    let mut views = HashMap::with_capacity(ids.len());
    let chunks: Vec<&[String]> = ids.chunks(batch.stats_batch_size.max(1)).collect();
    let total = chunks.len();

    for (i, chunk) in chunks.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(batch.delay()).await;
        }
        let res = limiter
            .call("videos.list", || async move {
                ledger.record(QuotaCost::VIDEO_STATS, "videos.list")?;
                api.video_statistics(chunk).await
            })
            .await;
        match res {
            Ok(map) => {
                debug!(batch = i + 1, of = total, fetched = map.len(), "fetched view counts");
                views.extend(map);
            }
            Err(e) if e.is_quota_exceeded() => {
                error!(error = %e, "quota exhausted while fetching statistics");
                break;
            }
            Err(e) => warn!(batch = i + 1, error = %e, "statistics batch failed, skipping"),
        }
    }
    views
}
