// src/pipeline.rs
//! Orchestration: Collection -> Enrichment -> Snapshot, plus the daily report and the
//! status digest. Chooses incremental vs full per stage from the run metadata and
//! merges incremental output into the persisted datasets by id.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analyze::ai_adapter::{InferenceClient, InferenceProvider, OpenAiCompatibleProvider};
use crate::analyze::transcript::{TimedTextSource, TranscriptSource};
use crate::analyze::Enricher;
use crate::cache::{CacheStats, ContentCache};
use crate::config::{Credentials, PipelineConfig};
use crate::dataset::{self, Item};
use crate::ingest::config::load_clusters_default;
use crate::ingest::types::VideoApi;
use crate::ingest::youtube::YoutubeClient;
use crate::ingest::{fetch_view_counts, Collector};
use crate::metadata::{MetadataStats, RunMetadata, Stage, StageCounts};
use crate::quota::{QuotaLedger, QuotaSnapshot};
use crate::ratelimit::Limiters;
use crate::report::{self, DailyReport};
use crate::snapshot::{self, SnapshotManifest};

const TRANSCRIPT_LANG: &str = "en";

/// Caller intent for one stage. The metadata may still force a full run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub incremental: bool,
    pub full_refresh: bool,
}

impl RunMode {
    pub fn incremental() -> Self {
        Self {
            incremental: true,
            full_refresh: false,
        }
    }

    pub fn full() -> Self {
        Self {
            incremental: false,
            full_refresh: true,
        }
    }
}

/// The three upstream collaborators. The video API is only needed by the stages
/// that spend quota.
pub struct Services {
    pub api: Option<Arc<dyn VideoApi>>,
    pub transcripts: Arc<dyn TranscriptSource>,
    pub inference: Arc<dyn InferenceProvider>,
}

impl Services {
    /// Real HTTP clients. `with_api` requires `YOUTUBE_API_KEY`.
    pub fn from_config(cfg: &PipelineConfig, with_api: bool) -> Result<Self> {
        let api: Option<Arc<dyn VideoApi>> = if with_api {
            let creds = Credentials::from_env()?;
            Some(Arc::new(YoutubeClient::new(creds.youtube_api_key)?))
        } else {
            None
        };
        Ok(Self {
            api,
            transcripts: Arc::new(TimedTextSource::new(TRANSCRIPT_LANG)?),
            inference: Arc::new(OpenAiCompatibleProvider::from_config(&cfg.analysis)?),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectSummary {
    pub incremental: bool,
    pub collected: usize,
    pub dataset_size: usize,
    pub failures: usize,
    pub quota_exhausted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichSummary {
    pub incremental: bool,
    pub processed: usize,
    pub enriched: usize,
    pub unenrichable: usize,
    pub failed: usize,
    pub dataset_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub collect: CollectSummary,
    pub enrich: EnrichSummary,
    pub snapshot: Option<SnapshotManifest>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    services: Services,
    limiters: Limiters,
    cache: Arc<ContentCache>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, services: Services) -> Self {
        let limiters = Limiters::from_config(&cfg.rate_limiting);
        let cache = Arc::new(ContentCache::new(
            &cfg.analysis.cache_dir,
            cfg.analysis.enable_caching,
        ));
        Self {
            cfg,
            services,
            limiters,
            cache,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.limiters.ledger
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    fn api(&self) -> Result<Arc<dyn VideoApi>> {
        self.services
            .api
            .clone()
            .context("this command needs the video API; set YOUTUBE_API_KEY")
    }

    /// Collect every configured cluster and merge into the collected dataset.
    pub async fn collect(&self, mode: RunMode) -> Result<CollectSummary> {
        let paths = &self.cfg.paths;
        let clusters = load_clusters_default(&PathBuf::from(&paths.cluster_config))?;
        let api = self.api()?;

        let mut metadata = RunMetadata::load(&paths.metadata_file);
        let incremental = metadata.resolve_mode(Stage::Ingest, mode.incremental, mode.full_refresh);
        let since = if incremental {
            metadata.last_timestamp(Stage::Ingest)
        } else {
            None
        };
        info!(incremental, since = ?since, "collection mode");

        let mut collector = Collector::new(api, Arc::clone(&self.limiters.youtube), &self.cfg.ingest);
        let outcome = collector.collect(&clusters, since).await;

        if outcome.items.is_empty() {
            if outcome.quota_exhausted {
                bail!("quota exhausted before any items were collected");
            }
            warn!("no new items collected");
            return Ok(CollectSummary {
                incremental,
                collected: 0,
                dataset_size: dataset::load_items(&PathBuf::from(&paths.cluster_data))?.len(),
                failures: outcome.failures.len(),
                quota_exhausted: false,
            });
        }

        let out_path = PathBuf::from(&paths.cluster_data);
        let collected = outcome.items.len();
        let merged = if incremental {
            dataset::merge_by_id(dataset::load_items(&out_path)?, outcome.items)
        } else {
            outcome.items
        };
        dataset::save_items(&out_path, &merged)?;
        info!(path = %out_path.display(), collected, total = merged.len(), "saved collected dataset");

        metadata.record_run(StageCounts::Ingest {
            videos: collected as u64,
        })?;
        if outcome.quota_exhausted {
            warn!(collected, "quota ran out mid-run, partial results saved");
        }

        Ok(CollectSummary {
            incremental,
            collected,
            dataset_size: merged.len(),
            failures: outcome.failures.len(),
            quota_exhausted: outcome.quota_exhausted,
        })
    }

    fn enricher(&self, workers: usize) -> Enricher {
        let analysis = &self.cfg.analysis;
        let client = InferenceClient::new(
            Arc::clone(&self.services.inference),
            Arc::clone(&self.limiters.inference),
            Arc::clone(&self.cache),
            analysis.max_transcript_chars,
        );
        Enricher::new(
            Arc::clone(&self.services.transcripts),
            Arc::clone(&self.limiters.transcript),
            Arc::clone(&self.cache),
            client,
            analysis.min_transcript_chars,
            workers,
        )
    }

    /// Enrich the collected dataset (or, incrementally, only what is new since the
    /// last enrichment) and merge into the enriched dataset.
    pub async fn enrich(&self, mode: RunMode, workers: Option<usize>) -> Result<EnrichSummary> {
        let paths = &self.cfg.paths;
        let collected = dataset::load_items(&PathBuf::from(&paths.cluster_data))?;
        let out_path = PathBuf::from(&paths.analyzed_data);
        let existing = dataset::load_items(&out_path)?;

        let mut metadata = RunMetadata::load(&paths.metadata_file);
        let incremental =
            metadata.resolve_mode(Stage::Analysis, mode.incremental, mode.full_refresh);
        let todo = if incremental {
            select_for_enrichment(collected, &existing, metadata.last_timestamp(Stage::Analysis))
        } else {
            collected
        };

        if todo.is_empty() {
            warn!(incremental, "nothing to enrich");
            return Ok(EnrichSummary {
                incremental,
                processed: 0,
                enriched: 0,
                unenrichable: 0,
                failed: 0,
                dataset_size: existing.len(),
            });
        }

        let workers = workers.unwrap_or(self.cfg.analysis.workers);
        let report = self.enricher(workers).enrich_all(todo).await;

        let processed = report.total();
        let merged = if incremental {
            dataset::merge_by_id(existing, report.items)
        } else {
            report.items
        };
        dataset::save_items(&out_path, &merged)?;
        info!(path = %out_path.display(), processed, total = merged.len(), "saved enriched dataset");

        metadata.record_run(StageCounts::Analysis {
            total: processed as u64,
            analyzed: report.enriched as u64,
        })?;

        Ok(EnrichSummary {
            incremental,
            processed,
            enriched: report.enriched,
            unenrichable: report.unenrichable,
            failed: report.failed,
            dataset_size: merged.len(),
        })
    }

    pub fn snapshot(&self) -> Result<SnapshotManifest> {
        snapshot_datasets(&self.cfg)
    }

    /// Collection, enrichment, then a snapshot when anything was written.
    pub async fn run(&self, incremental: bool, workers: Option<usize>) -> Result<PipelineSummary> {
        let mode = if incremental {
            RunMode::incremental()
        } else {
            RunMode::full()
        };
        let collect = self.collect(mode).await?;
        let enrich = self.enrich(mode, workers).await?;

        let snapshot = if collect.collected > 0 || enrich.processed > 0 {
            Some(self.snapshot()?)
        } else {
            warn!("nothing changed, skipping snapshot");
            None
        };
        Ok(PipelineSummary {
            collect,
            enrich,
            snapshot,
        })
    }

    /// Fresh collection of the items published on `date`, ranked and trimmed by views,
    /// with per-cluster text; written to `<reports_dir>/<date>/report.json`.
    pub async fn daily_report(&self, date: NaiveDate) -> Result<PathBuf> {
        let paths = &self.cfg.paths;
        let clusters = load_clusters_default(&PathBuf::from(&paths.cluster_config))?;
        let api = self.api()?;

        let since = date.and_time(NaiveTime::MIN).and_utc();
        let mut collector =
            Collector::new(Arc::clone(&api), Arc::clone(&self.limiters.youtube), &self.cfg.ingest);
        let outcome = collector.collect(&clusters, Some(since)).await;
        if outcome.items.is_empty() && outcome.quota_exhausted {
            bail!("quota exhausted before any items were collected");
        }

        let on_date = report::items_on_date(outcome.items, date);
        if on_date.is_empty() {
            warn!(date = %date, "no items published on this date");
        }
        let ids: Vec<String> = on_date.iter().map(|i| i.video_id.clone()).collect();
        let views: HashMap<String, u64> = if ids.is_empty() {
            HashMap::new()
        } else {
            fetch_view_counts(
                api.as_ref(),
                &self.limiters.youtube,
                &ids,
                &self.cfg.rate_limiting.batch_operations,
            )
            .await
        };

        let ranked = report::rank_by_views(on_date, &views);
        let selected = report::select_top(&ranked);
        info!(
            items = ranked.len(),
            selected = selected.len(),
            total_views = ranked.iter().map(|r| r.views).sum::<u64>(),
            "selected top items"
        );
        let clusters = report::gather_cluster_text(
            &selected,
            &self.cache,
            self.services.transcripts.as_ref(),
            &self.limiters.transcript,
        )
        .await;

        let report = DailyReport::new(date, &ranked, selected, clusters);
        report::write_report(Path::new(&paths.reports_dir), &report)
    }

    /// End-of-run digest: quota, throttles, retries, errors and cache hit rate.
    pub fn finish(&self) -> QuotaSnapshot {
        self.limiters.ledger.summary();
        self.cache.log_stats();
        self.limiters.ledger.snapshot()
    }
}

/// Copy both datasets into today's snapshot directory.
pub fn snapshot_datasets(cfg: &PipelineConfig) -> Result<SnapshotManifest> {
    let paths = &cfg.paths;
    let collected = PathBuf::from(&paths.cluster_data);
    let enriched = PathBuf::from(&paths.analyzed_data);
    snapshot::create_snapshot(
        Path::new(&paths.historical_dir),
        &[collected.as_path(), enriched.as_path()],
    )
}

/// Items the enriched dataset has never seen, plus anything collected at or after the
/// last enrichment run.
pub fn select_for_enrichment(
    collected: Vec<Item>,
    enriched: &[Item],
    last_analysis: Option<chrono::DateTime<Utc>>,
) -> Vec<Item> {
    let known: std::collections::HashSet<&str> =
        enriched.iter().map(|i| i.video_id.as_str()).collect();
    collected
        .into_iter()
        .filter(|i| {
            !known.contains(i.video_id.as_str())
                || last_analysis.is_some_and(|t| i.collected_at >= t)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub metadata: MetadataStats,
    pub collected_items: usize,
    pub enriched_items: usize,
    pub cache: CacheStats,
    pub snapshots: Vec<NaiveDate>,
}

/// Read-only digest of the persisted state. Touches no upstream.
pub fn status(cfg: &PipelineConfig) -> Result<StatusReport> {
    let paths = &cfg.paths;
    let metadata = RunMetadata::load(&paths.metadata_file).stats();
    let count = |p: &str| match dataset::load_items(Path::new(p)) {
        Ok(items) => items.len(),
        Err(e) => {
            error!(path = p, error = %e, "dataset unreadable");
            0
        }
    };
    let cache = ContentCache::new(&cfg.analysis.cache_dir, cfg.analysis.enable_caching);
    Ok(StatusReport {
        metadata,
        collected_items: count(paths.cluster_data.as_str()),
        enriched_items: count(paths.analyzed_data.as_str()),
        cache: cache.stats(),
        snapshots: snapshot::list_snapshots(Path::new(&paths.historical_dir)),
    })
}
