//! Durable registry snapshot, persisted as a JSON file.
//!
//! `global_keys` holds the ids observed per collection; `delete_keys`
//! holds the previous cycle's snapshot, kept so a later reconciliation
//! can diff the two. The file is read once at cycle start and rewritten
//! atomically (temp file + rename) at cycle end.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::CollectionRegistry;

/// On-disk layout of the identity registry store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub global_keys: BTreeMap<String, CollectionRegistry>,
    #[serde(default)]
    pub delete_keys: BTreeMap<String, CollectionRegistry>,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing file is a fresh start; a corrupt
    /// file is logged and treated the same way rather than aborting the
    /// cycle.
    pub fn load(&self) -> SyncState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) => return SyncState::default(),
            Err(_) => return SyncState::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "registry store is corrupt, starting from an empty registry"
                );
                SyncState::default()
            }
        }
    }

    /// Atomically rewrite the snapshot.
    pub fn save(&self, state: &SyncState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create state directory: {}", parent.display())
                })?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, raw)
            .with_context(|| format!("failed to write registry store: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace registry store: {}", self.path.display()))?;
        Ok(())
    }
}
