// src/metadata.rs
//! Run metadata: last successful timestamp per stage, lifetime counters and a log of
//! run summaries. Loaded whole at start, rewritten whole on every recorded run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Analysis,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Analysis => "analysis",
        }
    }
}

/// Counts reported by a finished stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCounts {
    Ingest { videos: u64 },
    Analysis { total: u64, analyzed: u64 },
}

impl StageCounts {
    pub fn stage(&self) -> Stage {
        match self {
            StageCounts::Ingest { .. } => Stage::Ingest,
            StageCounts::Analysis { .. } => Stage::Analysis,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunSummary {
    Ingest {
        timestamp: DateTime<Utc>,
        videos: u64,
    },
    Analysis {
        timestamp: DateTime<Utc>,
        total_videos: u64,
        analyzed: u64,
        skipped: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataDoc {
    #[serde(default)]
    pub last_ingest_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_analysis_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_videos_ingested: u64,
    #[serde(default)]
    pub total_videos_analyzed: u64,
    #[serde(default)]
    pub pipeline_runs: Vec<RunSummary>,
    pub created_at: DateTime<Utc>,
}

impl MetadataDoc {
    fn fresh() -> Self {
        Self {
            last_ingest_timestamp: None,
            last_analysis_timestamp: None,
            total_videos_ingested: 0,
            total_videos_analyzed: 0,
            pipeline_runs: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetadataStats {
    pub total_videos_ingested: u64,
    pub total_videos_analyzed: u64,
    pub total_runs: usize,
    pub last_ingest: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RunMetadata {
    path: PathBuf,
    doc: MetadataDoc,
}

impl RunMetadata {
    /// A missing or unreadable document starts fresh. A corrupt one is moved aside to
    /// `<name>.corrupt` first so the next save cannot destroy the run history.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                let aside = corrupt_path(&path);
                match fs::rename(&path, &aside) {
                    Ok(()) => warn!(
                        error = %e,
                        path = %path.display(),
                        moved_to = %aside.display(),
                        "metadata corrupt, kept a copy and starting fresh"
                    ),
                    Err(re) => warn!(
                        error = %e,
                        rename_error = %re,
                        path = %path.display(),
                        "metadata corrupt and could not be moved aside, starting fresh"
                    ),
                }
                MetadataDoc::fresh()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataDoc::fresh(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "metadata unreadable, starting fresh");
                MetadataDoc::fresh()
            }
        };
        Self { path, doc }
    }

    pub fn doc(&self) -> &MetadataDoc {
        &self.doc
    }

    pub fn last_timestamp(&self, stage: Stage) -> Option<DateTime<Utc>> {
        match stage {
            Stage::Ingest => self.doc.last_ingest_timestamp,
            Stage::Analysis => self.doc.last_analysis_timestamp,
        }
    }

    /// True iff a previous successful run of `stage` exists.
    pub fn should_incremental(&self, stage: Stage) -> bool {
        self.last_timestamp(stage).is_some()
    }

    /// Incremental only when asked for (or not explicitly refused) AND a previous run
    /// exists. The first run of a stage is always full.
    pub fn resolve_mode(&self, stage: Stage, incremental: bool, full_refresh: bool) -> bool {
        let wanted = incremental || (!full_refresh && self.should_incremental(stage));
        if wanted && !self.should_incremental(stage) {
            info!(stage = stage.as_str(), "no previous run recorded, running full");
            return false;
        }
        wanted
    }

    pub fn record_run(&mut self, counts: StageCounts) -> Result<DateTime<Utc>> {
        self.record_run_at(counts, Utc::now())
    }

    pub fn record_run_at(&mut self, counts: StageCounts, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match counts {
            StageCounts::Ingest { videos } => {
                self.doc.last_ingest_timestamp = Some(now);
                self.doc.total_videos_ingested += videos;
                self.doc.pipeline_runs.push(RunSummary::Ingest {
                    timestamp: now,
                    videos,
                });
                info!(videos, timestamp = %now, "updated ingest metadata");
            }
            StageCounts::Analysis { total, analyzed } => {
                self.doc.last_analysis_timestamp = Some(now);
                self.doc.total_videos_analyzed += analyzed;
                self.doc.pipeline_runs.push(RunSummary::Analysis {
                    timestamp: now,
                    total_videos: total,
                    analyzed,
                    skipped: total.saturating_sub(analyzed),
                });
                info!(analyzed, total, timestamp = %now, "updated analysis metadata");
            }
        }
        self.save()?;
        Ok(now)
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.doc).context("serializing metadata")?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("writing metadata {}", self.path.display()))
    }

    pub fn stats(&self) -> MetadataStats {
        MetadataStats {
            total_videos_ingested: self.doc.total_videos_ingested,
            total_videos_analyzed: self.doc.total_videos_analyzed,
            total_runs: self.doc.pipeline_runs.len(),
            last_ingest: self.doc.last_ingest_timestamp,
            last_analysis: self.doc.last_analysis_timestamp,
            created_at: self.doc.created_at,
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_forces_full_even_when_incremental_requested() {
        let dir = tempfile::tempdir().unwrap();
        let meta = RunMetadata::load(dir.path().join("metadata.json"));
        assert!(!meta.should_incremental(Stage::Ingest));
        assert!(!meta.resolve_mode(Stage::Ingest, true, false));
    }

    #[test]
    fn record_updates_only_its_stage_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        let mut meta = RunMetadata::load(&path);
        let ts = meta.record_run(StageCounts::Ingest { videos: 12 }).unwrap();

        let reloaded = RunMetadata::load(&path);
        assert_eq!(reloaded.last_timestamp(Stage::Ingest), Some(ts));
        assert_eq!(reloaded.last_timestamp(Stage::Analysis), None);
        assert!(reloaded.resolve_mode(Stage::Ingest, false, false));
        assert!(!reloaded.resolve_mode(Stage::Ingest, false, true));
        assert!(!reloaded.resolve_mode(Stage::Analysis, true, false));
    }

    #[test]
    fn analysis_summary_counts_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = RunMetadata::load(dir.path().join("m.json"));
        meta.record_run(StageCounts::Analysis { total: 10, analyzed: 7 }).unwrap();
        meta.record_run(StageCounts::Analysis { total: 3, analyzed: 3 }).unwrap();
        let stats = meta.stats();
        assert_eq!(stats.total_videos_analyzed, 10);
        assert_eq!(stats.total_runs, 2);
        match &meta.doc().pipeline_runs[0] {
            RunSummary::Analysis { skipped, .. } => assert_eq!(*skipped, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn corrupt_document_is_kept_aside_and_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        fs::write(&path, "[]").unwrap();
        let mut meta = RunMetadata::load(&path);
        assert_eq!(meta.stats().total_runs, 0);

        let aside = dir.path().join("metadata.json.corrupt");
        assert_eq!(fs::read_to_string(&aside).unwrap(), "[]");
        assert!(!path.exists());

        // A later save leaves the preserved copy alone.
        meta.record_run(StageCounts::Ingest { videos: 1 }).unwrap();
        assert_eq!(fs::read_to_string(&aside).unwrap(), "[]");
        assert_eq!(RunMetadata::load(&path).stats().total_runs, 1);
    }
}
