//! Identity registry: the per-collection record of object ids seen in a
//! cycle, keyed by hierarchy level.
//!
//! The registry is an explicit tree value (level → parent key → ids)
//! with a pure union merge, so partition deltas can be combined after
//! the join barrier without any lock discipline inside workers. Diffing
//! a previous snapshot against the current one yields the ids that
//! disappeared from the source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ids observed for one collection, one map per hierarchy level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionRegistry {
    /// site id → server-relative path
    #[serde(default)]
    pub sites: BTreeMap<String, String>,
    /// site path → (list id → list title)
    #[serde(default)]
    pub lists: BTreeMap<String, BTreeMap<String, String>>,
    /// site path → (list title → item GUIDs)
    #[serde(default)]
    pub list_items: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl CollectionRegistry {
    pub fn record_site(&mut self, id: impl Into<String>, path: impl Into<String>) {
        self.sites.insert(id.into(), path.into());
    }

    pub fn record_list(
        &mut self,
        site_path: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
    ) {
        self.lists
            .entry(site_path.into())
            .or_default()
            .insert(id.into(), title.into());
    }

    pub fn record_item(
        &mut self,
        site_path: impl Into<String>,
        list_title: impl Into<String>,
        guid: impl Into<String>,
    ) {
        let guids = self
            .list_items
            .entry(site_path.into())
            .or_default()
            .entry(list_title.into())
            .or_default();
        let guid = guid.into();
        if !guids.contains(&guid) {
            guids.push(guid);
        }
    }

    /// Additive union of another registry into this one.
    ///
    /// Entries under unrelated parent keys are never overwritten; leaves
    /// under the same key are unioned (a duplicate GUID is kept once).
    pub fn merge(&mut self, other: CollectionRegistry) {
        self.sites.extend(other.sites);
        for (site, lists) in other.lists {
            self.lists.entry(site).or_default().extend(lists);
        }
        for (site, by_title) in other.list_items {
            let site_entry = self.list_items.entry(site).or_default();
            for (title, guids) in by_title {
                let entry = site_entry.entry(title).or_default();
                for guid in guids {
                    if !entry.contains(&guid) {
                        entry.push(guid);
                    }
                }
            }
        }
    }

    /// Total number of recorded ids across all levels.
    pub fn len(&self) -> usize {
        let lists: usize = self.lists.values().map(|m| m.len()).sum();
        let items: usize = self
            .list_items
            .values()
            .flat_map(|m| m.values())
            .map(|v| v.len())
            .sum();
        self.sites.len() + lists + items
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids present in `previous` but absent from `current`, across all
    /// levels. These are the objects that disappeared from the source
    /// between the two cycles and should be purged from the sink.
    pub fn deleted_ids(previous: &Self, current: &Self) -> Vec<String> {
        let mut gone = Vec::new();

        for id in previous.sites.keys() {
            if !current.sites.contains_key(id) {
                gone.push(id.clone());
            }
        }

        for (site, lists) in &previous.lists {
            let current_lists = current.lists.get(site);
            for id in lists.keys() {
                if !current_lists.is_some_and(|m| m.contains_key(id)) {
                    gone.push(id.clone());
                }
            }
        }

        for (site, by_title) in &previous.list_items {
            let current_site = current.list_items.get(site);
            for (title, guids) in by_title {
                let current_guids = current_site.and_then(|m| m.get(title));
                for guid in guids {
                    if !current_guids.is_some_and(|v| v.contains(guid)) {
                        gone.push(guid.clone());
                    }
                }
            }
        }

        gone
    }
}
