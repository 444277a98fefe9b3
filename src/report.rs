// src/report.rs
//! Daily report: the items published on one UTC date, ranked by views, trimmed to the
//! ones that carry most of the attention, with per-cluster transcript text gathered
//! for downstream rendering.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyze::fetch_transcript;
use crate::analyze::transcript::TranscriptSource;
use crate::cache::ContentCache;
use crate::dataset::{write_atomic, Item};
use crate::ratelimit::ScrapeLimiter;

pub const REPORT_FILE: &str = "report.json";

/// Cumulative share of total views the selected prefix may cover.
pub const VIEW_SHARE_CUTOFF: f64 = 0.67;

/// Kept when the single most-viewed item already exceeds the cutoff.
pub const FALLBACK_TOP_N: usize = 5;

/// Items added for each cluster that the cutoff left out entirely.
pub const CLUSTER_SAFETY_NET: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedItem {
    pub video_id: String,
    pub title: String,
    pub cluster: String,
    pub channel_handle: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub views: u64,
}

impl RankedItem {
    fn from_item(item: Item, views: u64) -> Self {
        Self {
            video_id: item.video_id,
            title: item.title,
            cluster: item.cluster,
            channel_handle: item.channel_handle,
            url: item.url,
            published_at: item.published_at,
            views,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterText {
    pub items: usize,
    /// Items whose text came from a transcript; the rest fell back to the title.
    pub from_transcripts: usize,
    pub chars: usize,
    #[serde(skip)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub items_on_date: usize,
    pub total_views: u64,
    pub selected_views: u64,
    pub selected: Vec<RankedItem>,
    pub clusters: BTreeMap<String, ClusterText>,
}

/// Items whose publish instant falls on `date` (UTC).
pub fn items_on_date(items: Vec<Item>, date: NaiveDate) -> Vec<Item> {
    items
        .into_iter()
        .filter(|i| i.published_at.date_naive() == date)
        .collect()
}

/// Attach view counts (missing counts as zero) and sort most-viewed first. Ties keep a
/// stable order by id.
pub fn rank_by_views(items: Vec<Item>, views: &HashMap<String, u64>) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = items
        .into_iter()
        .map(|i| {
            let v = views.get(&i.video_id).copied().unwrap_or(0);
            RankedItem::from_item(i, v)
        })
        .collect();
    ranked.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.video_id.cmp(&b.video_id)));
    ranked
}

/// Longest most-viewed prefix whose cumulative share stays within the cutoff. When that
/// prefix is empty (the top item alone is past it, or nothing has views) the top
/// `FALLBACK_TOP_N` are kept. Then every cluster with no selected item gets its own top
/// `CLUSTER_SAFETY_NET`. Output stays in rank order.
pub fn select_top(ranked: &[RankedItem]) -> Vec<RankedItem> {
    let total: u64 = ranked.iter().map(|r| r.views).sum();

    let mut keep = 0;
    if total > 0 {
        let mut cumulative = 0u64;
        for r in ranked {
            cumulative += r.views;
            if cumulative as f64 / total as f64 > VIEW_SHARE_CUTOFF {
                break;
            }
            keep += 1;
        }
    }
    if keep == 0 {
        keep = FALLBACK_TOP_N.min(ranked.len());
    }

    let mut chosen: BTreeSet<usize> = (0..keep).collect();
    let present: BTreeSet<&str> = ranked[..keep].iter().map(|r| r.cluster.as_str()).collect();
    let mut added: HashMap<&str, usize> = HashMap::new();
    for (idx, r) in ranked.iter().enumerate().skip(keep) {
        if present.contains(r.cluster.as_str()) {
            continue;
        }
        let n = added.entry(r.cluster.as_str()).or_insert(0);
        if *n < CLUSTER_SAFETY_NET {
            *n += 1;
            chosen.insert(idx);
        }
    }
    if !added.is_empty() {
        let mut missing: Vec<&str> = added.keys().copied().collect();
        missing.sort_unstable();
        info!(clusters = ?missing, "adding top items for clusters missing from the selection");
    }

    chosen.into_iter().map(|i| ranked[i].clone()).collect()
}

/// Per-cluster text of the selected items: the transcript when one can be had (cache
/// first), the title otherwise.
pub async fn gather_cluster_text(
    selected: &[RankedItem],
    cache: &ContentCache,
    transcripts: &dyn TranscriptSource,
    scrape: &ScrapeLimiter,
) -> BTreeMap<String, ClusterText> {
    let mut parts: BTreeMap<String, (ClusterText, Vec<String>)> = BTreeMap::new();
    for r in selected {
        let text = match fetch_transcript(cache, transcripts, scrape, &r.video_id).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => None,
            Err(e) => {
                warn!(video_id = %r.video_id, error = %e, "transcript unavailable, using title");
                None
            }
        };
        let (summary, texts) = parts.entry(r.cluster.clone()).or_default();
        summary.items += 1;
        match text {
            Some(t) => {
                summary.from_transcripts += 1;
                texts.push(t);
            }
            None => texts.push(r.title.clone()),
        }
    }

    parts
        .into_iter()
        .map(|(cluster, (mut summary, texts))| {
            summary.text = texts.join(" ");
            summary.chars = summary.text.chars().count();
            info!(cluster = %cluster, chars = summary.chars, "collected cluster text");
            (cluster, summary)
        })
        .collect()
}

impl DailyReport {
    pub fn new(
        date: NaiveDate,
        ranked: &[RankedItem],
        selected: Vec<RankedItem>,
        clusters: BTreeMap<String, ClusterText>,
    ) -> Self {
        Self {
            date,
            generated_at: Utc::now(),
            items_on_date: ranked.len(),
            total_views: ranked.iter().map(|r| r.views).sum(),
            selected_views: selected.iter().map(|r| r.views).sum(),
            selected,
            clusters,
        }
    }
}

pub fn report_dir(reports_dir: &Path, date: NaiveDate) -> PathBuf {
    reports_dir.join(date.format("%Y-%m-%d").to_string())
}

/// Write `<reports_dir>/<date>/report.json`, replacing an earlier report for that date.
pub fn write_report(reports_dir: &Path, report: &DailyReport) -> Result<PathBuf> {
    let dir = report_dir(reports_dir, report.date);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(REPORT_FILE);
    let json = serde_json::to_vec_pretty(report).context("serializing daily report")?;
    write_atomic(&path, &json).with_context(|| format!("writing {}", path.display()))?;
    info!(
        path = %path.display(),
        selected = report.selected.len(),
        total_views = report.total_views,
        "daily report written"
    );
    Ok(path)
}
