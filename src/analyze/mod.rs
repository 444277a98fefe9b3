// src/analyze/mod.rs
//! Enrichment stage: transcript (cache-first, paced) -> structured inference
//! (cache-first, validated) -> folded back onto the item. Items run through a bounded
//! pool; each yields a tagged outcome, so one failure never touches its siblings.

pub mod ai_adapter;
pub mod schema;
pub mod transcript;

use futures::stream::{self, StreamExt};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::InferenceClient;
use crate::analyze::transcript::{join_segments, TranscriptSource};
use crate::cache::ContentCache;
use crate::dataset::Item;
use crate::error::{Error, Result};
use crate::ratelimit::ScrapeLimiter;

pub use schema::Analysis;

/// Per-item result of the enrichment pool.
#[derive(Debug, Clone)]
pub enum EnrichOutcome {
    Enriched(Item),
    /// No transcript, or one too short to analyze. Not an error.
    Unenrichable { item: Item, reason: String },
    Failed { item: Item, reason: String },
}

impl EnrichOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichOutcome::Enriched(_) => "enriched",
            EnrichOutcome::Unenrichable { .. } => "unenrichable",
            EnrichOutcome::Failed { .. } => "failed",
        }
    }

    pub fn item(&self) -> &Item {
        match self {
            EnrichOutcome::Enriched(item)
            | EnrichOutcome::Unenrichable { item, .. }
            | EnrichOutcome::Failed { item, .. } => item,
        }
    }

    pub fn into_item(self) -> Item {
        match self {
            EnrichOutcome::Enriched(item)
            | EnrichOutcome::Unenrichable { item, .. }
            | EnrichOutcome::Failed { item, .. } => item,
        }
    }
}

#[derive(Debug, Default)]
pub struct EnrichReport {
    /// Every input item, in input order, enriched or with null enrichment fields.
    pub items: Vec<Item>,
    pub enriched: usize,
    pub unenrichable: usize,
    pub failed: usize,
}

impl EnrichReport {
    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// Cache-first transcript text for one item. A fetched transcript is joined, cached
/// and returned; a missing or blank one is `Ok(None)`.
pub async fn fetch_transcript(
    cache: &ContentCache,
    transcripts: &dyn TranscriptSource,
    scrape: &ScrapeLimiter,
    video_id: &str,
) -> Result<Option<String>> {
    if let Some(text) = cache.get_raw(video_id) {
        return Ok(Some(text));
    }
    let fetched = scrape
        .call(video_id, || async move { transcripts.fetch_segments(video_id).await })
        .await;

    let text = match fetched {
        Ok(segments) => join_segments(&segments),
        Err(Error::TranscriptUnavailable { detail, .. }) => {
            debug!(video_id, detail = %detail, "no transcript");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    cache.put_raw(video_id, &text);
    Ok(Some(text))
}

pub struct Enricher {
    transcripts: Arc<dyn TranscriptSource>,
    scrape: Arc<ScrapeLimiter>,
    cache: Arc<ContentCache>,
    inference: InferenceClient,
    min_chars: usize,
    workers: usize,
}

impl Enricher {
    pub fn new(
        transcripts: Arc<dyn TranscriptSource>,
        scrape: Arc<ScrapeLimiter>,
        cache: Arc<ContentCache>,
        inference: InferenceClient,
        min_chars: usize,
        workers: usize,
    ) -> Self {
        Self {
            transcripts,
            scrape,
            cache,
            inference,
            min_chars,
            workers: workers.max(1),
        }
    }

    /// Cached transcript, or a paced fetch that is cached on success. `Ok(None)` means
    /// the item has no transcript.
    pub async fn fetch_raw(&self, video_id: &str) -> Result<Option<String>> {
        fetch_transcript(&self.cache, self.transcripts.as_ref(), &self.scrape, video_id).await
    }

    pub async fn enrich_one(&self, mut item: Item) -> EnrichOutcome {
        let text = match self.fetch_raw(&item.video_id).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                item.clear_enrichment();
                return EnrichOutcome::Unenrichable {
                    item,
                    reason: "no transcript".into(),
                };
            }
            Err(e) => {
                warn!(video_id = %item.video_id, error = %e, "transcript fetch failed");
                item.clear_enrichment();
                return EnrichOutcome::Failed {
                    item,
                    reason: e.to_string(),
                };
            }
        };

        let chars = text.chars().count();
        if chars < self.min_chars {
            debug!(video_id = %item.video_id, chars, min = self.min_chars, "transcript too short");
            item.clear_enrichment();
            return EnrichOutcome::Unenrichable {
                item,
                reason: format!("transcript too short ({chars} < {} chars)", self.min_chars),
            };
        }

        match self
            .inference
            .analyze(&item.video_id, &item.title, &item.cluster, &text)
            .await
        {
            Ok(analysis) => {
                item.raw_text = Some(text);
                item.analysis = Some(analysis);
                EnrichOutcome::Enriched(item)
            }
            Err(e) => {
                warn!(video_id = %item.video_id, error = %e, "enrichment failed");
                item.clear_enrichment();
                EnrichOutcome::Failed {
                    item,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Enrich every item with at most `workers` in flight. Results are collected as
    /// they complete and returned in input order once all are done.
    pub async fn enrich_all(&self, items: Vec<Item>) -> EnrichReport {
        let total = items.len();
        let order: HashMap<String, usize> = items
            .iter()
            .enumerate()
            .map(|(i, it)| (it.video_id.clone(), i))
            .collect();
        info!(total, workers = self.workers, provider = self.inference.provider_name(), "starting enrichment");

        let mut outcomes: Vec<EnrichOutcome> = Vec::with_capacity(total);
        let mut pending = stream::iter(items.into_iter().map(|item| self.enrich_one(item)))
            .buffer_unordered(self.workers);

        let step = (total / 10).max(1);
        while let Some(outcome) = pending.next().await {
            counter!("enrich_outcomes_total", "outcome" => outcome.label()).increment(1);
            outcomes.push(outcome);
            let done = outcomes.len();
            if done % step == 0 || done == total {
                info!(done, total, "enrichment progress");
            }
        }

        outcomes.sort_by_key(|o| order.get(&o.item().video_id).copied().unwrap_or(usize::MAX));

        let mut report = EnrichReport::default();
        for outcome in outcomes {
            match &outcome {
                EnrichOutcome::Enriched(_) => report.enriched += 1,
                EnrichOutcome::Unenrichable { .. } => report.unenrichable += 1,
                EnrichOutcome::Failed { .. } => report.failed += 1,
            }
            report.items.push(outcome.into_item());
        }
        info!(
            enriched = report.enriched,
            unenrichable = report.unenrichable,
            failed = report.failed,
            "enrichment finished"
        );
        report
    }
}
