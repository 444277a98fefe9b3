// tests/enrichment_e2e.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use common::{fast_limits, MockTranscripts, GOOD_ANALYSIS};
use vibes_tracker::ai_adapter::{InferenceClient, InferenceProvider, InferenceRequest, MockProvider};
use vibes_tracker::analyze::{EnrichOutcome, Enricher};
use vibes_tracker::cache::ContentCache;
use vibes_tracker::dataset::Item;
use vibes_tracker::ratelimit::Limiters;
use vibes_tracker::Result;

fn item(id: &str) -> Item {
    let ts = chrono::Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap();
    Item {
        video_id: id.to_string(),
        title: format!("title {id}"),
        published_at: ts,
        cluster: "A".into(),
        channel_handle: "@h1".into(),
        channel_title: None,
        url: Item::watch_url(id),
        collected_at: ts,
        raw_text: None,
        analysis: None,
    }
}

struct Rig {
    enricher: Enricher,
    provider: Arc<MockProvider>,
    transcripts: Arc<MockTranscripts>,
    cache: Arc<ContentCache>,
}

fn rig(cache_dir: &std::path::Path, transcripts: MockTranscripts, provider: MockProvider) -> Rig {
    let limiters = Limiters::from_config(&fast_limits());
    let cache = Arc::new(ContentCache::new(cache_dir, true));
    let provider = Arc::new(provider);
    let transcripts = Arc::new(transcripts);
    let client = InferenceClient::new(
        provider.clone(),
        limiters.inference.clone(),
        cache.clone(),
        64_000,
    );
    let enricher = Enricher::new(
        transcripts.clone(),
        limiters.transcript.clone(),
        cache.clone(),
        client,
        100,
        4,
    );
    Rig {
        enricher,
        provider,
        transcripts,
        cache,
    }
}

#[tokio::test]
async fn short_transcript_is_unenrichable_without_inference() {
    let tmp = tempfile::tempdir().unwrap();
    let r = rig(
        tmp.path(),
        MockTranscripts::default().with("v1", &"a".repeat(50)),
        MockProvider::new(GOOD_ANALYSIS),
    );

    let outcome = r.enricher.enrich_one(item("v1")).await;
    assert!(matches!(outcome, EnrichOutcome::Unenrichable { .. }));
    let out = outcome.into_item();
    assert!(out.raw_text.is_none());
    assert!(out.analysis.is_none());
    assert_eq!(r.provider.calls(), 0);
}

#[tokio::test]
async fn cached_analysis_skips_inference_and_matches_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let transcript = "word ".repeat(40);
    let r = rig(
        tmp.path(),
        MockTranscripts::default().with("v1", &transcript),
        MockProvider::new(GOOD_ANALYSIS),
    );

    let first = r.enricher.enrich_one(item("v1")).await;
    assert!(matches!(first, EnrichOutcome::Enriched(_)));
    assert_eq!(r.provider.calls(), 1);
    assert_eq!(r.transcripts.calls(), 1);

    let second = r.enricher.enrich_one(item("v1")).await.into_item();
    assert_eq!(r.provider.calls(), 1);
    // Transcript came from the cache too.
    assert_eq!(r.transcripts.calls(), 1);

    let cached = r.cache.get_structured_entry("v1").unwrap();
    assert_eq!(
        serde_json::to_string(second.analysis.as_ref().unwrap()).unwrap(),
        serde_json::to_string(&cached.data).unwrap()
    );
    assert_eq!(second, first.into_item());
}

#[tokio::test]
async fn malformed_output_is_a_failure_and_never_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let r = rig(
        tmp.path(),
        MockTranscripts::default().with("v1", &"word ".repeat(40)),
        MockProvider::new(r#"{"core_themes": ["only", "two"]}"#),
    );

    let outcome = r.enricher.enrich_one(item("v1")).await;
    assert!(matches!(outcome, EnrichOutcome::Failed { .. }));
    assert!(outcome.item().analysis.is_none());
    assert!(r.cache.get_structured("v1").is_none());
    // The transcript itself was fine and stays cached.
    assert!(r.cache.get_raw("v1").is_some());
}

#[tokio::test]
async fn one_failure_does_not_touch_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    let body = "word ".repeat(40);
    let transcripts = MockTranscripts::default()
        .with("ok1", &body)
        .with("bad", &body)
        .with("ok2", &body)
        .with("short", "too short");
    // Calls are concurrent, so the malformed reply can land on any item; with one bad
    // reply exactly one item fails.
    let provider = MockProvider::with_queue(GOOD_ANALYSIS, vec!["not json".into()]);
    let r = rig(tmp.path(), transcripts, provider);

    let items = vec![item("ok1"), item("bad"), item("none"), item("ok2"), item("short")];
    let report = r.enricher.enrich_all(items).await;

    assert_eq!(report.total(), 5);
    let ids: Vec<&str> = report.items.iter().map(|i| i.video_id.as_str()).collect();
    assert_eq!(ids, vec!["ok1", "bad", "none", "ok2", "short"]);
    assert_eq!(report.failed, 1);
    assert_eq!(report.enriched, 2);
    // "none" has no captions, "short" is below the minimum.
    assert_eq!(report.unenrichable, 2);
    assert_eq!(r.provider.calls(), 3);
}

/// Slow backend that records how many calls overlap.
#[derive(Default)]
struct GaugedProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl InferenceProvider for GaugedProvider {
    async fn complete(&self, _req: &InferenceRequest) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(GOOD_ANALYSIS.to_string())
    }

    fn name(&self) -> &'static str {
        "gauged"
    }
}

#[tokio::test(start_paused = true)]
async fn worker_pool_bounds_concurrent_inference() {
    let tmp = tempfile::tempdir().unwrap();
    let body = "word ".repeat(40);
    let ids: Vec<String> = (0..10).map(|n| format!("v{n}")).collect();
    let transcripts = ids
        .iter()
        .fold(MockTranscripts::default(), |t, id| t.with(id, &body));

    let limiters = Limiters::from_config(&fast_limits());
    let cache = Arc::new(ContentCache::new(tmp.path(), true));
    let provider = Arc::new(GaugedProvider::default());
    let client = InferenceClient::new(provider.clone(), limiters.inference.clone(), cache.clone(), 64_000);
    let workers = 3;
    let enricher = Enricher::new(
        Arc::new(transcripts),
        limiters.transcript.clone(),
        cache,
        client,
        100,
        workers,
    );

    let report = enricher.enrich_all(ids.iter().map(|id| item(id)).collect()).await;

    assert_eq!(report.enriched, 10);
    let peak = provider.peak.load(Ordering::SeqCst);
    assert!(peak <= workers, "peak {peak} exceeded {workers} workers");
    assert!(peak > 1, "calls never overlapped");
}
