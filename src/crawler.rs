//! Hierarchical crawler: one time-window partition's traversal of
//! sites → lists → items (attachments inline), projecting each object
//! into a sink document and recording its id in the partition's
//! registry delta.
//!
//! Failure semantics: source fetch errors downgrade to empty results
//! for that branch and the crawl continues with siblings; sink
//! submission and grant-push errors set the partition failure flag but
//! never halt remaining work. The outcome (delta plus flag) is the
//! partition's entire report to the coordinator; no state is shared
//! while the crawl runs.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::Window;
use crate::config::ObjectsConfig;
use crate::error::FetchError;
use crate::extract::extract_text;
use crate::models::{AttrMap, Document, ObjectKind};
use crate::permissions::{PermissionResolver, PermissionScope};
use crate::registry::CollectionRegistry;
use crate::schema::{project, projected_schema};
use crate::sink::Sink;
use crate::source::{encode_title, time_filter, SourceClient};

/// Documents per sink submission.
pub const BATCH_SIZE: usize = 100;

/// What one partition reports back through the join barrier.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub delta: CollectionRegistry,
    pub failed: bool,
    pub documents_indexed: usize,
}

/// A list discovered in stage two, carried into stage three.
#[derive(Debug, Clone)]
struct ListRef {
    site_path: String,
    id: String,
    title: String,
}

pub struct Crawler {
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn Sink>,
    resolver: PermissionResolver,
    objects: ObjectsConfig,
    enable_permissions: bool,
    window: Window,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn SourceClient>,
        sink: Arc<dyn Sink>,
        resolver: PermissionResolver,
        objects: ObjectsConfig,
        enable_permissions: bool,
        window: Window,
    ) -> Self {
        Self {
            source,
            sink,
            resolver,
            objects,
            enable_permissions,
            window,
        }
    }

    /// Crawl every configured object kind for `collection` within this
    /// partition's window.
    pub async fn run(&self, collection: &str) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let mut site_paths: Vec<String> = Vec::new();
        let mut lists: Vec<ListRef> = Vec::new();

        for kind in self.objects.enabled_kinds() {
            match kind {
                ObjectKind::Sites => {
                    let sites = self.fetch_sites(collection).await;
                    site_paths = extract_site_paths(&sites);
                    self.index_sites(&sites, &mut outcome).await;
                }
                ObjectKind::Lists => {
                    if site_paths.is_empty() {
                        // Stage one was skipped or empty: re-derive the
                        // site paths without indexing them.
                        site_paths = extract_site_paths(&self.fetch_sites(collection).await);
                    }
                    lists = self.crawl_lists(&site_paths, &mut outcome).await;
                }
                ObjectKind::Items => {
                    if lists.is_empty() {
                        if site_paths.is_empty() {
                            site_paths =
                                extract_site_paths(&self.fetch_sites(collection).await);
                        }
                        lists = self.discover_lists(&site_paths).await;
                    }
                    self.crawl_items(&lists, &mut outcome).await;
                }
            }
        }

        outcome
    }

    /// Downgrade a branch fetch error to an empty result set.
    fn downgrade(err: FetchError, what: &str) -> Vec<AttrMap> {
        warn!(error = %err, "could not fetch {what}, treating as empty");
        Vec::new()
    }

    async fn fetch_sites(&self, collection: &str) -> Vec<AttrMap> {
        let rel_url = format!("/sites/{collection}/_api/web/webs");
        let query = time_filter(ObjectKind::Sites, &self.window);
        match self.source.fetch(&rel_url, &query).await {
            Ok(rows) => rows,
            Err(err) => Self::downgrade(err, "sites"),
        }
    }

    async fn index_sites(&self, sites: &[AttrMap], outcome: &mut CrawlOutcome) {
        if sites.is_empty() {
            debug!(
                start = %self.window.start,
                end = %self.window.end,
                "no sites modified in this interval"
            );
            return;
        }
        let schema = projected_schema(ObjectKind::Sites, self.objects.rules(ObjectKind::Sites));

        let mut documents = Vec::with_capacity(sites.len());
        for attrs in sites {
            let Some(site_path) = attr_str(attrs, "ServerRelativeUrl") else {
                continue;
            };
            let fields = project(&schema, attrs);
            let permissions = self
                .resolve_permissions(PermissionScope::Site { site_path }, outcome)
                .await;
            let doc = Document {
                kind: ObjectKind::Sites,
                fields,
                url: Some(site_path.to_string()),
                allow_permissions: permissions,
            };
            if let Some(id) = doc.id() {
                outcome.delta.record_site(id, site_path);
            }
            documents.push(doc);
        }

        self.submit(documents, ObjectKind::Sites.as_str(), outcome).await;
    }

    async fn crawl_lists(
        &self,
        site_paths: &[String],
        outcome: &mut CrawlOutcome,
    ) -> Vec<ListRef> {
        let mut refs = Vec::new();
        if site_paths.is_empty() {
            debug!("no site paths to fetch lists for");
            return refs;
        }

        let schema = projected_schema(ObjectKind::Lists, self.objects.rules(ObjectKind::Lists));
        for site_path in site_paths {
            let rows = self.fetch_lists_for(site_path).await;
            if rows.is_empty() {
                continue;
            }

            let mut documents = Vec::with_capacity(rows.len());
            for attrs in &rows {
                let Some(title) = attr_str(attrs, "Title") else {
                    continue;
                };
                let list_id = attr_string(attrs, "Id").unwrap_or_default();

                let fields = project(&schema, attrs);
                let permissions = self
                    .resolve_permissions(
                        PermissionScope::List {
                            site_path,
                            list_id: &list_id,
                        },
                        outcome,
                    )
                    .await;
                let doc = Document {
                    kind: ObjectKind::Lists,
                    fields,
                    url: Some(format!("{site_path}/Lists/{}", sanitize_title(title))),
                    allow_permissions: permissions,
                };
                if let Some(id) = doc.id() {
                    outcome.delta.record_list(site_path, id, title);
                }
                documents.push(doc);

                refs.push(ListRef {
                    site_path: site_path.clone(),
                    id: list_id,
                    title: title.to_string(),
                });
            }
            self.submit(documents, ObjectKind::Lists.as_str(), outcome).await;
        }
        refs
    }

    /// Lists stage without projection or indexing, used when the lists
    /// kind is disabled but items still need their parents.
    async fn discover_lists(&self, site_paths: &[String]) -> Vec<ListRef> {
        let mut refs = Vec::new();
        for site_path in site_paths {
            for attrs in self.fetch_lists_for(site_path).await {
                let (Some(title), Some(id)) =
                    (attr_str(&attrs, "Title"), attr_string(&attrs, "Id"))
                else {
                    continue;
                };
                refs.push(ListRef {
                    site_path: site_path.clone(),
                    id,
                    title: title.to_string(),
                });
            }
        }
        refs
    }

    async fn fetch_lists_for(&self, site_path: &str) -> Vec<AttrMap> {
        let rel_url = format!("{site_path}/_api/web/lists");
        let query = time_filter(ObjectKind::Lists, &self.window);
        match self.source.fetch(&rel_url, &query).await {
            Ok(rows) => rows,
            Err(err) => Self::downgrade(err, "lists"),
        }
    }

    async fn crawl_items(&self, lists: &[ListRef], outcome: &mut CrawlOutcome) {
        if lists.is_empty() {
            debug!(
                start = %self.window.start,
                end = %self.window.end,
                "no lists to fetch items for in this interval"
            );
            return;
        }

        let schema = projected_schema(ObjectKind::Items, self.objects.rules(ObjectKind::Items));
        for list in lists {
            let rel_url = format!(
                "{}/_api/web/lists/getbytitle('{}')/items",
                list.site_path,
                encode_title(&list.title)
            );
            let query = time_filter(ObjectKind::Items, &self.window);
            let rows = match self.source.fetch(&rel_url, &query).await {
                Ok(rows) => rows,
                Err(err) => Self::downgrade(err, "items"),
            };
            if rows.is_empty() {
                continue;
            }

            // One metadata query per list resolves attachment file paths
            // for every row carrying the attachment flag.
            let attachment_rel = format!(
                "{}/_api/web/lists/getbytitle('{}')/items?$select=Attachments,AttachmentFiles,Title&$expand=AttachmentFiles",
                list.site_path,
                encode_title(&list.title)
            );
            let attachment_rows = match self.source.fetch(&attachment_rel, "").await {
                Ok(rows) => rows,
                Err(err) => Self::downgrade(err, "attachment metadata"),
            };
            let attachments_by_title: std::collections::HashMap<&str, &AttrMap> = attachment_rows
                .iter()
                .filter_map(|row| attr_str(row, "Title").map(|t| (t, row)))
                .collect();

            let base_url = format!(
                "{}/Lists/{}/DispForm.aspx?ID=",
                list.site_path,
                sanitize_title(&list.title)
            );

            let mut documents = Vec::with_capacity(rows.len());
            for attrs in &rows {
                let mut fields = project(&schema, attrs);

                let body = if has_attachment_flag(attrs) {
                    let metadata = attr_str(attrs, "Title")
                        .and_then(|t| attachments_by_title.get(t).copied());
                    self.attachment_body(metadata).await
                } else {
                    None
                };
                fields.insert("body".into(), body.map(Value::String).unwrap_or(Value::Null));

                let item_id = attr_string(attrs, "Id").unwrap_or_default();
                let permissions = self
                    .resolve_permissions(
                        PermissionScope::Item {
                            site_path: &list.site_path,
                            list_id: &list.id,
                            item_id: &item_id,
                        },
                        outcome,
                    )
                    .await;

                let doc = Document {
                    kind: ObjectKind::Items,
                    fields,
                    url: Some(format!("{base_url}{item_id}")),
                    allow_permissions: permissions,
                };
                if let Some(guid) = attr_str(attrs, "GUID") {
                    outcome
                        .delta
                        .record_item(&list.site_path, &list.title, guid);
                }
                documents.push(doc);
            }
            self.submit(documents, ObjectKind::Items.as_str(), outcome).await;
        }
    }

    /// Download and extract one attachment's text. Any failure along
    /// the way degrades to `None`; the item is indexed either way.
    async fn attachment_body(&self, metadata: Option<&AttrMap>) -> Option<String> {
        let file_rel = metadata
            .and_then(|m| m.get("AttachmentFiles"))
            .and_then(|f| f.get("results"))
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(|file| file.get("ServerRelativeUrl"))
            .and_then(Value::as_str)?;

        let download_rel = format!(
            "{}/_api/web/GetFileByServerRelativeUrl('{file_rel}')/$value",
            site_of(file_rel)
        );
        let bytes = match self.source.download(&download_rel).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file = file_rel, error = %err, "attachment download failed, indexing with empty body");
                return None;
            }
        };
        match extract_text(&bytes) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(file = file_rel, error = %err, "attachment extraction failed, indexing with empty body");
                None
            }
        }
    }

    async fn resolve_permissions(
        &self,
        scope: PermissionScope<'_>,
        outcome: &mut CrawlOutcome,
    ) -> Vec<String> {
        if !self.enable_permissions {
            return Vec::new();
        }
        let grants = self.resolver.resolve(scope).await;
        if grants.sink_errors > 0 {
            outcome.failed = true;
        }
        grants.labels
    }

    /// Submit staged documents in fixed-size batches. A failed batch
    /// marks the partition failed; the remaining batches still go out.
    async fn submit(&self, documents: Vec<Document>, what: &str, outcome: &mut CrawlOutcome) {
        if documents.is_empty() {
            return;
        }
        let mut accepted = 0usize;
        for batch in documents.chunks(BATCH_SIZE) {
            match self.sink.index_documents(batch).await {
                Ok(count) => accepted += count,
                Err(err) => {
                    warn!(error = %err, "failed to index a batch of {what}");
                    outcome.failed = true;
                }
            }
        }
        outcome.documents_indexed += accepted;
        info!(accepted, total = documents.len(), "indexed {what} to the sink");
    }
}

fn attr_str<'a>(attrs: &'a AttrMap, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str)
}

/// Attribute as a string regardless of its JSON type (list and item ids
/// arrive as numbers).
fn attr_string(attrs: &AttrMap, key: &str) -> Option<String> {
    match attrs.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn has_attachment_flag(attrs: &AttrMap) -> bool {
    matches!(attrs.get("Attachments"), Some(Value::Bool(true)))
}

fn extract_site_paths(sites: &[AttrMap]) -> Vec<String> {
    sites
        .iter()
        .filter_map(|attrs| attr_str(attrs, "ServerRelativeUrl"))
        .map(str::to_string)
        .collect()
}

/// `/sites/<collection>/<web>` prefix of a server-relative file path.
fn site_of(file_rel: &str) -> &str {
    let mut slashes = 0;
    for (idx, ch) in file_rel.char_indices() {
        if ch == '/' {
            slashes += 1;
            if slashes == 4 {
                return &file_rel[..idx];
            }
        }
    }
    file_rel
}

/// Strip characters that are not word characters, spaces, or `+`,
/// matching how the source names list folders in URLs.
fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == ' ' || *c == '+')
        .collect()
}
