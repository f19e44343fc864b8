//! Cycle coordinator: for each configured site collection it derives
//! the sync window, partitions it across workers, fans one crawler out
//! per partition, and merges their deltas behind the join barrier.
//! Checkpoints commit per collection after the merge; deletion
//! reconciliation and registry persistence close the cycle.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointStore, SyncMode, Window};
use crate::config::Config;
use crate::crawler::{Crawler, CrawlOutcome, BATCH_SIZE};
use crate::permissions::PermissionResolver;
use crate::registry::CollectionRegistry;
use crate::sink::Sink;
use crate::source::SourceClient;
use crate::state::StateStore;
use crate::windows::{effective_workers, partition};

/// What one cycle accomplished, for the caller to log or print.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub documents_indexed: usize,
    pub documents_deleted: usize,
    pub collections_failed: Vec<String>,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.collections_failed.is_empty()
    }
}

pub struct Coordinator {
    config: Config,
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn Sink>,
    state: StateStore,
    checkpoints: CheckpointStore,
    identity_map: HashMap<String, String>,
}

impl Coordinator {
    pub fn new(config: Config, source: Arc<dyn SourceClient>, sink: Arc<dyn Sink>) -> Self {
        let state = StateStore::new(&config.state.registry_path);
        let checkpoints =
            CheckpointStore::new(&config.state.checkpoint_path, config.sync.start_time);
        let identity_map =
            PermissionResolver::load_identity_map(config.sync.user_mapping.as_deref());
        Self {
            config,
            source,
            sink,
            state,
            checkpoints,
            identity_map,
        }
    }

    /// Run one complete sync cycle in `mode`, with `now` as the upper
    /// window boundary for every collection.
    pub async fn run_cycle(&self, mode: SyncMode, now: DateTime<Utc>) -> Result<CycleReport> {
        info!(mode = mode.as_str(), "starting sync cycle");
        let mut state = self.state.load();
        let mut report = CycleReport::default();

        // A full sync rebuilds the permission grants from scratch, so
        // the sink's existing grants go first, exactly once.
        if mode == SyncMode::FullSync && self.config.sync.enable_permissions {
            if let Err(err) = self.sink.remove_all_permissions().await {
                error!(error = %err, "could not clear sink permissions, grants may be stale");
            }
        }

        let collections = self.config.sharepoint.site_collections.clone();
        for collection in &collections {
            let window = self.checkpoints.window_for(collection, mode, now);
            let outcome = self.crawl_collection(collection, window).await;

            report.documents_indexed += outcome.documents_indexed;
            self.checkpoints
                .commit(collection, mode, window, !outcome.failed)
                .with_context(|| format!("persisting checkpoint for {collection}"))?;

            // Previously observed ids, plus any still awaiting purge
            // from an earlier failed reconciliation.
            let mut previous = state
                .global_keys
                .get(collection)
                .cloned()
                .unwrap_or_default();
            if let Some(pending) = state.delete_keys.get(collection) {
                previous.merge(pending.clone());
            }

            let mut current = match mode {
                // Incremental cycles only add: everything previously
                // known is still assumed present.
                SyncMode::Incremental => previous.clone(),
                // Full sync re-observes the world, so anything absent
                // from the crawl is a deletion candidate.
                SyncMode::FullSync => CollectionRegistry::default(),
            };
            current.merge(outcome.delta);

            if outcome.failed {
                warn!(%collection, "collection crawl failed, keeping previous registry");
                report.collections_failed.push(collection.clone());
                continue;
            }

            if mode == SyncMode::FullSync {
                report.documents_deleted +=
                    self.reconcile_deletions(collection, &previous, &current, &mut state)
                        .await;
            }
            state.global_keys.insert(collection.clone(), current);
        }

        self.state
            .save(&state)
            .context("persisting the id registry")?;
        info!(
            indexed = report.documents_indexed,
            deleted = report.documents_deleted,
            failed = report.collections_failed.len(),
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Fan one crawler out per sub-window and merge their outcomes.
    async fn crawl_collection(&self, collection: &str, window: Window) -> CrawlOutcome {
        // An empty window still runs once so a brand new collection is
        // observed at least one time.
        let workers = if window.start == window.end {
            1
        } else {
            effective_workers(self.config.sync.worker_count)
        };
        let boundaries = partition(window.start, window.end, workers);
        info!(
            %collection,
            workers,
            start = %window.start,
            end = %window.end,
            "crawling collection"
        );

        let mut tasks = JoinSet::new();
        for pair in boundaries.windows(2) {
            let sub_window = Window {
                start: pair[0],
                end: pair[1],
            };
            let crawler = Crawler::new(
                Arc::clone(&self.source),
                Arc::clone(&self.sink),
                PermissionResolver::new(
                    Arc::clone(&self.source),
                    Arc::clone(&self.sink),
                    self.identity_map.clone(),
                ),
                self.config.objects.clone(),
                self.config.sync.enable_permissions,
                sub_window,
            );
            let collection = collection.to_string();
            tasks.spawn(async move { crawler.run(&collection).await });
        }

        let mut merged = CrawlOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    merged.documents_indexed += outcome.documents_indexed;
                    merged.failed |= outcome.failed;
                    merged.delta.merge(outcome.delta);
                }
                Err(err) => {
                    error!(error = %err, "crawler task aborted");
                    merged.failed = true;
                }
            }
        }
        merged
    }

    /// Purge ids the full sync no longer observed. A failed purge keeps
    /// the previous registry in the pending set so the next full sync
    /// retries it.
    async fn reconcile_deletions(
        &self,
        collection: &str,
        previous: &CollectionRegistry,
        current: &CollectionRegistry,
        state: &mut crate::state::SyncState,
    ) -> usize {
        let deleted = CollectionRegistry::deleted_ids(previous, current);
        if deleted.is_empty() {
            state.delete_keys.remove(collection);
            return 0;
        }

        let mut purged = true;
        for chunk in deleted.chunks(BATCH_SIZE) {
            if let Err(err) = self.sink.delete_documents(chunk).await {
                error!(%collection, error = %err, "could not delete stale documents from the sink");
                purged = false;
            }
        }
        if purged {
            info!(%collection, count = deleted.len(), "purged stale documents");
            state.delete_keys.remove(collection);
            deleted.len()
        } else {
            state
                .delete_keys
                .insert(collection.to_string(), previous.clone());
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_counts_as_success() {
        let report = CycleReport::default();
        assert!(report.succeeded());
    }

    #[test]
    fn any_failed_collection_fails_the_report() {
        let report = CycleReport {
            collections_failed: vec!["intranet".into()],
            ..CycleReport::default()
        };
        assert!(!report.succeeded());
    }
}
