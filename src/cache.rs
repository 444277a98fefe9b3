// src/cache.rs
//! File-per-key cache with two disjoint namespaces:
//! `<dir>/transcripts/<id>.txt` (raw text) and `<dir>/analysis/<id>.json` (structured).
//!
//! Best-effort throughout: an I/O or decode failure is logged and reported as a miss
//! (read) or `false` (write). Nothing here can abort a pipeline run.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::analyze::schema::Analysis;
use crate::dataset::write_atomic;

const RAW_DIR: &str = "transcripts";
const STRUCTURED_DIR: &str = "analysis";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredEntry {
    pub cached_at: DateTime<Utc>,
    pub data: Analysis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub count: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub raw: NamespaceStats,
    pub structured: NamespaceStats,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Session hit rate in 0.0..=1.0 (0 when nothing was looked up).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct ContentCache {
    enabled: bool,
    raw_dir: PathBuf,
    structured_dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentCache {
    pub fn new(root: impl AsRef<Path>, enabled: bool) -> Self {
        let root = root.as_ref();
        let cache = Self {
            enabled,
            raw_dir: root.join(RAW_DIR),
            structured_dir: root.join(STRUCTURED_DIR),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        if enabled {
            for dir in [&cache.raw_dir, &cache.structured_dir] {
                if let Err(e) = fs::create_dir_all(dir) {
                    warn!(error = %e, dir = %dir.display(), "cannot create cache dir");
                }
            }
        }
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn hit(&self, kind: &'static str, id: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("cache_hits_total", "kind" => kind).increment(1);
        debug!(kind, id, "cache hit");
    }

    fn miss(&self, kind: &'static str, id: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("cache_misses_total", "kind" => kind).increment(1);
        debug!(kind, id, "cache miss");
    }

    fn raw_path(&self, id: &str) -> Option<PathBuf> {
        safe_key(id).then(|| self.raw_dir.join(format!("{id}.txt")))
    }

    fn structured_path(&self, id: &str) -> Option<PathBuf> {
        safe_key(id).then(|| self.structured_dir.join(format!("{id}.json")))
    }

    pub fn get_raw(&self, id: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let Some(path) = self.raw_path(id) else {
            warn!(id, "refusing unsafe cache key");
            return None;
        };
        if !path.exists() {
            self.miss("raw", id);
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(text) => {
                self.hit("raw", id);
                Some(text)
            }
            Err(e) => {
                error!(error = %e, id, "reading cached transcript failed");
                self.miss("raw", id);
                None
            }
        }
    }

    pub fn put_raw(&self, id: &str, text: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(path) = self.raw_path(id) else {
            warn!(id, "refusing unsafe cache key");
            return false;
        };
        match write_atomic(&path, text.as_bytes()) {
            Ok(()) => {
                debug!(id, bytes = text.len(), "cached transcript");
                true
            }
            Err(e) => {
                error!(error = %e, id, "caching transcript failed");
                false
            }
        }
    }

    pub fn get_structured(&self, id: &str) -> Option<Analysis> {
        self.get_structured_entry(id).map(|e| e.data)
    }

    pub fn get_structured_entry(&self, id: &str) -> Option<StructuredEntry> {
        if !self.enabled {
            return None;
        }
        let Some(path) = self.structured_path(id) else {
            warn!(id, "refusing unsafe cache key");
            return None;
        };
        if !path.exists() {
            self.miss("structured", id);
            return None;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<StructuredEntry>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(entry) => {
                self.hit("structured", id);
                Some(entry)
            }
            Err(e) => {
                error!(error = %e, id, "reading cached analysis failed");
                self.miss("structured", id);
                None
            }
        }
    }

    /// Callers only hand over records that already passed schema validation.
    pub fn put_structured(&self, id: &str, analysis: &Analysis) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(path) = self.structured_path(id) else {
            warn!(id, "refusing unsafe cache key");
            return false;
        };
        let entry = StructuredEntry {
            cached_at: Utc::now(),
            data: analysis.clone(),
        };
        let written = serde_json::to_vec_pretty(&entry)
            .map_err(std::io::Error::other)
            .and_then(|bytes| write_atomic(&path, &bytes));
        match written {
            Ok(()) => {
                debug!(id, "cached analysis");
                true
            }
            Err(e) => {
                error!(error = %e, id, "caching analysis failed");
                false
            }
        }
    }

    pub fn clear_raw(&self) -> usize {
        let n = clear_dir(&self.raw_dir, "txt");
        info!(deleted = n, "cleared cached transcripts");
        n
    }

    pub fn clear_structured(&self) -> usize {
        let n = clear_dir(&self.structured_dir, "json");
        info!(deleted = n, "cleared cached analysis results");
        n
    }

    pub fn clear_all(&self) -> usize {
        self.clear_raw() + self.clear_structured()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            raw: dir_stats(&self.raw_dir, "txt"),
            structured: dir_stats(&self.structured_dir, "json"),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let s = self.stats();
        info!(
            transcripts = s.raw.count,
            transcript_bytes = s.raw.bytes,
            analyses = s.structured.count,
            analysis_bytes = s.structured.bytes,
            "cache contents"
        );
        if s.hits + s.misses > 0 {
            info!(
                hit_rate_pct = %format!("{:.1}", s.hit_rate() * 100.0),
                hits = s.hits,
                misses = s.misses,
                "cache hit rate"
            );
        }
    }
}

/// Ids become file names, so only plain id characters are accepted.
fn safe_key(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn entries_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(rd) = fs::read_dir(dir) else {
        return Vec::new();
    };
    rd.filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|x| x.to_str()) == Some(ext))
        .collect()
}

fn clear_dir(dir: &Path, ext: &str) -> usize {
    let mut count = 0;
    for path in entries_with_ext(dir, ext) {
        match fs::remove_file(&path) {
            Ok(()) => count += 1,
            Err(e) => error!(error = %e, path = %path.display(), "deleting cache entry failed"),
        }
    }
    count
}

fn dir_stats(dir: &Path, ext: &str) -> NamespaceStats {
    let files = entries_with_ext(dir, ext);
    let bytes = files
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
    NamespaceStats {
        count: files.len(),
        bytes,
    }
}
