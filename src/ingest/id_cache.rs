// src/ingest/id_cache.rs
//! Persistent flat JSON string map (handle -> channel id, channel id -> uploads playlist).
//! Entries are never evicted.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::dataset::write_atomic;

#[derive(Debug, Default)]
pub struct IdCache {
    /// `None` keeps the cache in memory only.
    path: Option<PathBuf>,
    map: BTreeMap<String, String>,
    dirty: bool,
}

impl IdCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Missing file starts empty; an unreadable one starts empty with a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let map = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "id cache unreadable, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %path.display(), entries = map.len(), "loaded id cache");
        Self {
            path: Some(path),
            map,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Write if anything changed since the last save.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&self.map).context("serializing id cache")?;
        write_atomic(path, &json).with_context(|| format!("writing {}", path.display()))?;
        self.dirty = false;
        debug!(path = %path.display(), entries = self.map.len(), "saved id cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_ids.json");

        let mut c = IdCache::load(&path);
        assert!(c.is_empty());
        c.insert("@h1", "UC1");
        c.save().unwrap();

        let again = IdCache::load(&path);
        assert_eq!(again.get("@h1"), Some("UC1"));
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn in_memory_never_touches_disk() {
        let mut c = IdCache::in_memory();
        c.insert("a", "b");
        c.save().unwrap();
        assert_eq!(c.get("a"), Some("b"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, "not json").unwrap();
        assert!(IdCache::load(&path).is_empty());
    }
}
