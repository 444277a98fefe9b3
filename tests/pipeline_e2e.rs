// tests/pipeline_e2e.rs
mod common;

use std::fs;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{base_time, entries, test_config, MockTranscripts, MockVideoApi, GOOD_ANALYSIS};
use vibes_tracker::ai_adapter::MockProvider;
use vibes_tracker::config::PipelineConfig;
use vibes_tracker::dataset::load_items;
use vibes_tracker::metadata::{RunMetadata, Stage};
use vibes_tracker::pipeline::{self, Pipeline, RunMode, Services};
use vibes_tracker::report::DailyReport;
use vibes_tracker::snapshot;

fn write_clusters(cfg: &PipelineConfig, json: &str) {
    let path = std::path::Path::new(&cfg.paths.cluster_config);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, json).unwrap();
}

fn services(api: MockVideoApi, transcripts: MockTranscripts) -> Services {
    Services {
        api: Some(Arc::new(api)),
        transcripts: Arc::new(transcripts),
        inference: Arc::new(MockProvider::new(GOOD_ANALYSIS)),
    }
}

fn api() -> MockVideoApi {
    let all = entries("x", 60, base_time());
    MockVideoApi::default()
        .with_channel("@h1", "X", vec![all[..50].to_vec(), all[50..].to_vec()])
        .with_channel("@h2", "Y", vec![entries("y", 3, base_time())])
}

fn transcripts() -> MockTranscripts {
    MockTranscripts::default()
        .with("x-0", &"word ".repeat(40))
        .with("y-1", &"word ".repeat(40))
}

#[tokio::test]
async fn full_then_incremental_run() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    write_clusters(&cfg, r#"{"A": ["@h1"], "B": [" @h2 ", ""]}"#);

    let p = Pipeline::new(cfg.clone(), services(api(), transcripts()));
    // Incremental was asked for, but there is no earlier run.
    let first = p.run(true, Some(4)).await.unwrap();
    assert!(!first.collect.incremental);
    assert_eq!(first.collect.collected, 63);
    assert_eq!(first.enrich.processed, 63);
    assert_eq!(first.enrich.enriched, 2);
    assert_eq!(first.enrich.unenrichable, 61);
    let manifest = first.snapshot.expect("snapshot written");
    assert_eq!(manifest.files.len(), 2);

    let enriched = load_items(std::path::Path::new(&cfg.paths.analyzed_data)).unwrap();
    assert_eq!(enriched.len(), 63);
    assert!(enriched.iter().any(|i| i.video_id == "y-1" && i.cluster == "B" && i.is_enriched()));

    let meta = RunMetadata::load(&cfg.paths.metadata_file);
    assert!(meta.should_incremental(Stage::Ingest));
    assert!(meta.should_incremental(Stage::Analysis));
    assert_eq!(meta.stats().total_videos_ingested, 63);
    assert_eq!(meta.stats().total_videos_analyzed, 2);

    // Same upstream content, nothing newer than the last run.
    let p2 = Pipeline::new(cfg.clone(), services(api(), transcripts()));
    let second = p2.run(true, None).await.unwrap();
    assert!(second.collect.incremental);
    assert_eq!(second.collect.collected, 0);
    assert_eq!(second.enrich.processed, 0);
    assert!(second.snapshot.is_none());
    // Handles were cached by the first run.
    assert_eq!(p2.ledger().units_used(), 1 + 1);

    let status = pipeline::status(&cfg).unwrap();
    assert_eq!(status.collected_items, 63);
    assert_eq!(status.enriched_items, 63);
    assert_eq!(status.metadata.total_runs, 2);
    assert_eq!(status.snapshots.len(), 1);
    assert!(status.cache.structured.count >= 2);
}

#[tokio::test]
async fn full_refresh_replaces_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    write_clusters(&cfg, r#"{"A": ["@h1"]}"#);

    let p = Pipeline::new(cfg.clone(), services(api(), transcripts()));
    p.collect(RunMode::full()).await.unwrap();

    write_clusters(&cfg, r#"{"B": ["@h2"]}"#);
    let s = p.collect(RunMode::full()).await.unwrap();
    assert!(!s.incremental);
    assert_eq!(s.dataset_size, 3);
}

#[tokio::test]
async fn quota_exhausted_before_progress_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = test_config(tmp.path());
    cfg.rate_limiting.youtube_api.daily_quota_limit = 50;
    write_clusters(&cfg, r#"{"A": ["@h1"]}"#);

    let p = Pipeline::new(cfg.clone(), services(api(), transcripts()));
    let err = p.collect(RunMode::default()).await.unwrap_err();
    assert!(err.to_string().contains("quota exhausted"));
    assert!(!std::path::Path::new(&cfg.paths.cluster_data).exists());
    assert!(!RunMetadata::load(&cfg.paths.metadata_file).should_incremental(Stage::Ingest));
}

#[tokio::test]
async fn missing_cluster_config_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let p = Pipeline::new(cfg, services(api(), transcripts()));
    assert!(p.collect(RunMode::default()).await.is_err());
}

#[tokio::test]
async fn enrich_without_collected_data_warns_and_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let p = Pipeline::new(cfg, services(api(), transcripts()));
    let s = p.enrich(RunMode::default(), None).await.unwrap();
    assert_eq!(s.processed, 0);
}

#[tokio::test]
async fn daily_report_selects_and_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    write_clusters(&cfg, r#"{"A": ["@h1"], "B": ["@h2"]}"#);

    let mut upstream = api();
    // x-0 dominates; cluster B has only small items.
    upstream.views.insert("x-0".into(), 10_000);
    upstream.views.insert("x-1".into(), 100);
    upstream.views.insert("y-0".into(), 5);
    upstream.views.insert("y-1".into(), 4);

    let p = Pipeline::new(cfg.clone(), services(upstream, transcripts()));
    let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
    let path = p.daily_report(date).await.unwrap();
    assert!(path.ends_with("2025-03-04/report.json"));

    let report: DailyReport = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    // Entries are hourly back from 12:00, so 13 of x and all 3 of y fall on the date.
    assert_eq!(report.items_on_date, 16);
    assert_eq!(report.selected[0].video_id, "x-0");
    assert!(report.selected.iter().any(|r| r.cluster == "B"));
    let b = &report.clusters["B"];
    assert_eq!(b.from_transcripts, 1);
    assert!(b.chars > 0);
}

#[test]
fn snapshot_without_datasets_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    assert!(pipeline::snapshot_datasets(&cfg).is_err());
    assert!(snapshot::list_snapshots(std::path::Path::new(&cfg.paths.historical_dir)).is_empty());
}
