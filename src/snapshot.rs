// src/snapshot.rs
//! Dated full-copy snapshots: `<historical_dir>/<YYYY-MM-DD>/` holds verbatim copies of
//! the collected and enriched datasets plus a `manifest.json` of sizes and SHA-256
//! digests. One snapshot per UTC day; a rerun the same day overwrites it.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::write_atomic;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotFile {
    pub name: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotManifest {
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn snapshot_dir(historical_dir: &Path, date: NaiveDate) -> PathBuf {
    historical_dir.join(date.format("%Y-%m-%d").to_string())
}

/// Copy `sources` into today's (UTC) snapshot directory.
pub fn create_snapshot(historical_dir: &Path, sources: &[&Path]) -> Result<SnapshotManifest> {
    create_snapshot_for(historical_dir, sources, Utc::now())
}

/// Missing sources are skipped with a warning; having none at all is an error.
pub fn create_snapshot_for(
    historical_dir: &Path,
    sources: &[&Path],
    now: DateTime<Utc>,
) -> Result<SnapshotManifest> {
    let present: Vec<&Path> = sources
        .iter()
        .copied()
        .filter(|src| {
            let exists = src.exists();
            if !exists {
                warn!(path = %src.display(), "dataset missing, not included in snapshot");
            }
            exists
        })
        .collect();
    if present.is_empty() {
        return Err(anyhow!("nothing to snapshot: no dataset files exist yet"));
    }

    let date = now.date_naive();
    let dir = snapshot_dir(historical_dir, date);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut files = Vec::with_capacity(present.len());
    for src in present {
        let name = src
            .file_name()
            .ok_or_else(|| anyhow!("dataset path has no file name: {}", src.display()))?
            .to_string_lossy()
            .to_string();
        let bytes = fs::read(src).with_context(|| format!("reading {}", src.display()))?;
        write_atomic(&dir.join(&name), &bytes)
            .with_context(|| format!("copying {} into snapshot", src.display()))?;
        files.push(SnapshotFile {
            name,
            bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        });
    }

    let manifest = SnapshotManifest {
        date,
        created_at: now,
        files,
    };
    let json = serde_json::to_vec_pretty(&manifest).context("serializing manifest")?;
    write_atomic(&dir.join(MANIFEST_FILE), &json).context("writing snapshot manifest")?;
    info!(dir = %dir.display(), files = manifest.files.len(), "snapshot written");
    Ok(manifest)
}

/// Re-hash every file listed in the manifest. Returns the names that don't match.
pub fn verify_snapshot(dir: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(dir.join(MANIFEST_FILE))
        .with_context(|| format!("reading manifest in {}", dir.display()))?;
    let manifest: SnapshotManifest = serde_json::from_str(&raw).context("parsing manifest")?;
    let mut bad = Vec::new();
    for f in &manifest.files {
        match fs::read(dir.join(&f.name)) {
            Ok(bytes) if bytes.len() as u64 == f.bytes && sha256_hex(&bytes) == f.sha256 => {}
            _ => bad.push(f.name.clone()),
        }
    }
    Ok(bad)
}

/// Dates with a snapshot directory, oldest first.
pub fn list_snapshots(historical_dir: &Path) -> Vec<NaiveDate> {
    let Ok(rd) = fs::read_dir(historical_dir) else {
        return Vec::new();
    };
    let mut dates: Vec<NaiveDate> = rd
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| NaiveDate::parse_from_str(&e.file_name().to_string_lossy(), "%Y-%m-%d").ok())
        .collect();
    dates.sort();
    dates
}
