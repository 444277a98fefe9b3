// src/dataset.rs
//! The `Item` record and the two persisted datasets (collected, enriched).
//!
//! Datasets are JSON arrays rewritten atomically (tmp + rename). Incremental runs merge
//! by id: existing records the new batch doesn't mention, then the new batch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::analyze::schema::Analysis;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Upstream-assigned id; cache and dedup key.
    pub video_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub cluster: String,
    /// Handle the item was collected through, e.g. `@channel`.
    pub channel_handle: String,
    #[serde(default)]
    pub channel_title: Option<String>,
    pub url: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
}

impl Item {
    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={video_id}")
    }

    pub fn is_enriched(&self) -> bool {
        self.analysis.is_some()
    }

    /// Drop any enrichment so the record goes out with null fields.
    pub fn clear_enrichment(&mut self) {
        self.raw_text = None;
        self.analysis = None;
    }
}

/// Missing file is an empty dataset; a corrupt file is an error.
pub fn load_items(path: &Path) -> Result<Vec<Item>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let s = fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&s).with_context(|| format!("parsing dataset {}", path.display()))
}

pub fn save_items(path: &Path, items: &[Item]) -> Result<()> {
    let json = serde_json::to_string_pretty(items).context("serializing dataset")?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("writing dataset {}", path.display()))
}

/// Existing records not superseded by `new` (original order), then `new`. Last wins per id.
pub fn merge_by_id(existing: Vec<Item>, new: Vec<Item>) -> Vec<Item> {
    let mut fresh_ids: HashSet<String> = HashSet::with_capacity(new.len());
    let mut deduped_new: Vec<Item> = Vec::with_capacity(new.len());
    for item in new.into_iter().rev() {
        if fresh_ids.insert(item.video_id.clone()) {
            deduped_new.push(item);
        }
    }
    deduped_new.reverse();

    let mut out: Vec<Item> = existing
        .into_iter()
        .filter(|i| !fresh_ids.contains(&i.video_id))
        .collect();
    out.extend(deduped_new);
    out
}

/// tmp file + rename, creating parent directories.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}
