// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "CLUSTERS_CONFIG_PATH";

/// Group label -> channel handles.
pub type ClusterMap = BTreeMap<String, Vec<String>>;

/// Load the cluster mapping from an explicit JSON path. A missing file is fatal.
pub fn load_clusters_from(path: &Path) -> Result<ClusterMap> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading cluster config from {}", path.display()))?;
    parse_clusters(&content).with_context(|| format!("parsing {}", path.display()))
}

/// 1) $CLUSTERS_CONFIG_PATH
/// 2) the configured `paths.cluster_config`
pub fn load_clusters_default(configured: &Path) -> Result<ClusterMap> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        return load_clusters_from(&pb);
    }
    if !configured.exists() {
        return Err(anyhow!(
            "cluster config not found at {}",
            configured.display()
        ));
    }
    load_clusters_from(configured)
}

fn parse_clusters(s: &str) -> Result<ClusterMap> {
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(s)?;
    let mut out = ClusterMap::new();
    for (group, handles) in raw {
        let group = group.trim();
        if group.is_empty() {
            continue;
        }
        let handles = clean_list(handles);
        if handles.is_empty() {
            tracing::warn!(cluster = group, "cluster has no handles, skipping");
            continue;
        }
        out.insert(group.to_string(), handles);
    }
    Ok(out)
}

/// Trim, drop empties, drop repeats (first occurrence wins, order kept).
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn trims_dedups_and_drops_empty_groups() {
        let json = r#"{
            "Left": [" @a ", "", "@b", "@a"],
            "Empty": ["  "],
            "Right": ["@c"]
        }"#;
        let out = parse_clusters(json).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["Left"], vec!["@a".to_string(), "@b".to_string()]);
        assert_eq!(out["Right"], vec!["@c".to_string()]);
    }

    #[test]
    fn wrong_shape_is_an_error() {
        assert!(parse_clusters(r#"["@a"]"#).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn env_override_then_configured_path() {
        let tmp = tempfile::tempdir().unwrap();
        env::remove_var(ENV_PATH);

        let configured = tmp.path().join("clusters.json");
        assert!(load_clusters_default(&configured).is_err());

        fs::write(&configured, r#"{"A": ["@h1"]}"#).unwrap();
        assert_eq!(load_clusters_default(&configured).unwrap()["A"], vec!["@h1".to_string()]);

        // Env wins over the configured path
        let other = tmp.path().join("other.json");
        fs::write(&other, r#"{"B": ["@h2"]}"#).unwrap();
        env::set_var(ENV_PATH, other.display().to_string());
        let v = load_clusters_default(&configured).unwrap();
        assert!(v.contains_key("B") && !v.contains_key("A"));

        env::set_var(ENV_PATH, tmp.path().join("nope.json").display().to_string());
        assert!(load_clusters_default(&configured).is_err());
        env::remove_var(ENV_PATH);
    }
}
