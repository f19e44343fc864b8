use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ObjectKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sharepoint: SharepointConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub objects: ObjectsConfig,
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SharepointConfig {
    /// Base URL of the SharePoint farm, e.g. `https://sharepoint.example.com`.
    pub host_url: String,
    /// Site collection names to crawl, e.g. `["collection_a"]`.
    pub site_collections: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// Base URL of the search service.
    pub host_url: String,
    /// Content source id the documents are indexed into.
    pub source_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Parallel crawl workers per collection. Zero means one per core.
    #[serde(default)]
    pub worker_count: usize,
    /// Absolute start of time for full syncs and first-ever incremental
    /// windows.
    #[serde(default = "default_start_time")]
    pub start_time: DateTime<Utc>,
    #[serde(default = "default_incremental_interval")]
    pub incremental_interval_mins: u64,
    #[serde(default = "default_full_sync_interval")]
    pub full_sync_interval_mins: u64,
    /// Resolve and push per-object permissions alongside documents.
    #[serde(default = "default_true")]
    pub enable_permissions: bool,
    /// Optional two-column CSV remapping source user names to index
    /// identities.
    #[serde(default)]
    pub user_mapping: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            worker_count: 0,
            start_time: default_start_time(),
            incremental_interval_mins: default_incremental_interval(),
            full_sync_interval_mins: default_full_sync_interval(),
            enable_permissions: true,
            user_mapping: None,
        }
    }
}

fn default_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}
fn default_incremental_interval() -> u64 {
    60
}
fn default_full_sync_interval() -> u64 {
    2880
}
fn default_true() -> bool {
    true
}

/// Object-kind allow-list with optional per-kind field filtering.
///
/// Leaving the whole `[objects]` table out enables all three kinds with
/// their full default schemas; naming any kind narrows the crawl to the
/// kinds named.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObjectsConfig {
    #[serde(default)]
    pub sites: Option<FieldRules>,
    #[serde(default)]
    pub lists: Option<FieldRules>,
    #[serde(default)]
    pub items: Option<FieldRules>,
}

impl ObjectsConfig {
    fn configured(&self, kind: ObjectKind) -> Option<&FieldRules> {
        match kind {
            ObjectKind::Sites => self.sites.as_ref(),
            ObjectKind::Lists => self.lists.as_ref(),
            ObjectKind::Items => self.items.as_ref(),
        }
    }

    fn any_configured(&self) -> bool {
        self.sites.is_some() || self.lists.is_some() || self.items.is_some()
    }

    pub fn is_enabled(&self, kind: ObjectKind) -> bool {
        !self.any_configured() || self.configured(kind).is_some()
    }

    /// Kinds to crawl, in traversal order.
    pub fn enabled_kinds(&self) -> Vec<ObjectKind> {
        ObjectKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Field filtering rules for a kind, if any were configured.
    pub fn rules(&self, kind: ObjectKind) -> Option<&FieldRules> {
        self.configured(kind)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FieldRules {
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// Per-collection sync cursor file.
    pub checkpoint_path: PathBuf,
    /// Identity registry snapshot file (`global_keys`/`delete_keys`).
    pub registry_path: PathBuf,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sharepoint.host_url.trim().is_empty() {
        anyhow::bail!("sharepoint.host_url must not be empty");
    }
    if !config.sharepoint.host_url.starts_with("http") {
        anyhow::bail!("sharepoint.host_url must be an http(s) URL");
    }
    if config.sharepoint.site_collections.is_empty() {
        anyhow::bail!("sharepoint.site_collections must name at least one collection");
    }
    if config.sink.host_url.trim().is_empty() {
        anyhow::bail!("sink.host_url must not be empty");
    }
    if config.sink.source_id.trim().is_empty() {
        anyhow::bail!("sink.source_id must not be empty");
    }
    if config.sync.incremental_interval_mins == 0 {
        anyhow::bail!("sync.incremental_interval_mins must be >= 1");
    }
    if config.sync.full_sync_interval_mins == 0 {
        anyhow::bail!("sync.full_sync_interval_mins must be >= 1");
    }

    Ok(config)
}
