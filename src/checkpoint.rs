//! Per-collection sync cursors.
//!
//! A checkpoint records the last successfully processed time boundary
//! for one collection. The next incremental window starts there; a full
//! sync always starts from the configured absolute start. Committing a
//! failed cycle re-persists the window's start so the same window is
//! retried, and the boundary never moves backwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a cycle's window is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// From the last checkpoint to now.
    Incremental,
    /// From the configured absolute start to now, preceded by a
    /// permission purge.
    FullSync,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::FullSync => "full_sync",
        }
    }
}

/// Half-open crawl interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub last_boundary: DateTime<Utc>,
    pub mode: String,
}

pub struct CheckpointStore {
    path: PathBuf,
    default_start: DateTime<Utc>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, default_start: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            default_start,
        }
    }

    fn read_all(&self) -> BTreeMap<String, CheckpointRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => return BTreeMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "checkpoint file is corrupt, falling back to the configured start time"
                );
                BTreeMap::new()
            }
        }
    }

    /// The interval the next cycle should crawl for `collection`.
    pub fn window_for(&self, collection: &str, mode: SyncMode, now: DateTime<Utc>) -> Window {
        let start = match mode {
            SyncMode::FullSync => self.default_start,
            SyncMode::Incremental => self
                .read_all()
                .get(collection)
                .map(|rec| rec.last_boundary)
                .unwrap_or(self.default_start),
        };
        Window { start, end: now }
    }

    /// Persist the cycle outcome for `collection`.
    ///
    /// Success advances the boundary to the window's end; failure keeps
    /// it at the window's start so the window is retried. An existing
    /// later boundary is never overwritten with an earlier one (a failed
    /// full sync must not rewind the incremental cursor).
    pub fn commit(
        &self,
        collection: &str,
        mode: SyncMode,
        window: Window,
        succeeded: bool,
    ) -> Result<()> {
        let boundary = if succeeded { window.end } else { window.start };

        let mut records = self.read_all();
        if let Some(existing) = records.get(collection) {
            if existing.last_boundary > boundary {
                debug!(
                    collection,
                    existing = %existing.last_boundary,
                    proposed = %boundary,
                    "keeping later checkpoint boundary"
                );
                return Ok(());
            }
        }
        records.insert(
            collection.to_string(),
            CheckpointRecord {
                last_boundary: boundary,
                mode: mode.as_str().to_string(),
            },
        );

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create checkpoint directory: {}", parent.display())
                })?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&records)?)
            .with_context(|| format!("failed to write checkpoint file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("failed to replace checkpoint file: {}", self.path.display())
        })?;
        Ok(())
    }
}
