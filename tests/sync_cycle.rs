//! End-to-end sync cycles against in-process source and sink fakes:
//! a tiny SharePoint farm with one collection, one site, one list, and
//! two items, one of which carries a PDF-less text attachment.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use spsync::checkpoint::SyncMode;
use spsync::config::{Config, ObjectsConfig, SharepointConfig, SinkConfig, StateConfig, SyncSettings};
use spsync::coordinator::Coordinator;
use spsync::error::{FetchError, SinkError};
use spsync::models::{AttrMap, Document};
use spsync::sink::Sink;
use spsync::source::SourceClient;
use spsync::state::StateStore;

fn rows(values: Vec<Value>) -> Vec<AttrMap> {
    values
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        })
        .collect()
}

/// Routes relative URLs to canned result rows; everything else is empty.
struct MockSource {
    routes: Mutex<HashMap<String, Vec<AttrMap>>>,
    attachment: Vec<u8>,
    fail_downloads: Mutex<bool>,
}

impl MockSource {
    fn farm() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "/sites/intranet/_api/web/webs".to_string(),
            rows(vec![json!({
                "Id": "web-1",
                "Title": "Engineering",
                "ServerRelativeUrl": "/sites/intranet/engineering",
                "Created": "2024-01-01T00:00:00Z",
                "LastItemModifiedDate": "2024-06-01T00:00:00Z",
                "Description": "eng wiki"
            })]),
        );
        routes.insert(
            "/sites/intranet/engineering/_api/web/lists".to_string(),
            rows(vec![json!({
                "Id": "list-1",
                "Title": "Docs",
                "Created": "2024-01-02T00:00:00Z",
                "LastItemModifiedDate": "2024-06-01T00:00:00Z",
                "ParentWebUrl": "/sites/intranet/engineering"
            })]),
        );
        routes.insert(
            "/sites/intranet/engineering/_api/web/lists/getbytitle('Docs')/items".to_string(),
            rows(vec![
                json!({
                    "Id": 1,
                    "GUID": "guid-1",
                    "Title": "Welcome",
                    "Modified": "2024-05-01T00:00:00Z",
                    "Attachments": false
                }),
                json!({
                    "Id": 2,
                    "GUID": "guid-2",
                    "Title": "Handbook",
                    "Modified": "2024-05-02T00:00:00Z",
                    "Attachments": true
                }),
            ]),
        );
        routes.insert(
            "/sites/intranet/engineering/_api/web/lists/getbytitle('Docs')/items?$select=Attachments,AttachmentFiles,Title&$expand=AttachmentFiles"
                .to_string(),
            rows(vec![json!({
                "Title": "Handbook",
                "Attachments": true,
                "AttachmentFiles": {
                    "results": [
                        {"ServerRelativeUrl": "/sites/intranet/engineering/Lists/Docs/handbook.txt"}
                    ]
                }
            })]),
        );
        routes.insert(
            "/sites/intranet/engineering/_api/web/roleassignments?$expand=Member/users,RoleDefinitionBindings"
                .to_string(),
            rows(vec![json!({
                "Member": {
                    "Title": "Engineers",
                    "Users": {"results": [{"Title": "alice"}, {"Title": "bob"}]}
                }
            })]),
        );
        Self {
            routes: Mutex::new(routes),
            attachment: b"welcome to the handbook".to_vec(),
            fail_downloads: Mutex::new(false),
        }
    }

    /// Drop the site's only list from the farm, as if it were deleted
    /// at the source.
    fn remove_list(&self) {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(
            "/sites/intranet/engineering/_api/web/lists".to_string(),
            Vec::new(),
        );
        routes.insert(
            "/sites/intranet/engineering/_api/web/lists/getbytitle('Docs')/items".to_string(),
            Vec::new(),
        );
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn fetch(&self, rel_url: &str, _query: &str) -> Result<Vec<AttrMap>, FetchError> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(rel_url)
            .cloned()
            .unwrap_or_default())
    }

    async fn download(&self, rel_url: &str) -> Result<Vec<u8>, FetchError> {
        if *self.fail_downloads.lock().unwrap() {
            return Err(FetchError::Malformed {
                url: rel_url.to_string(),
                reason: "download refused".to_string(),
            });
        }
        Ok(self.attachment.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    indexed: Mutex<Vec<Document>>,
    grants: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    permission_wipes: Mutex<usize>,
    fail_indexing: Mutex<bool>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn index_documents(&self, documents: &[Document]) -> Result<usize, SinkError> {
        if *self.fail_indexing.lock().unwrap() {
            return Err(SinkError::Malformed {
                url: "bulk_create".into(),
                reason: "forced failure".into(),
            });
        }
        let mut indexed = self.indexed.lock().unwrap();
        indexed.extend(documents.iter().cloned());
        Ok(documents.len())
    }

    async fn add_permission(&self, user: &str, permission: &str) -> Result<(), SinkError> {
        self.grants
            .lock()
            .unwrap()
            .push((user.to_string(), permission.to_string()));
        Ok(())
    }

    async fn remove_all_permissions(&self) -> Result<(), SinkError> {
        *self.permission_wipes.lock().unwrap() += 1;
        Ok(())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), SinkError> {
        self.deleted.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }
}

fn test_config(tmp: &TempDir, workers: usize) -> Config {
    Config {
        sharepoint: SharepointConfig {
            host_url: "https://sharepoint.example.com".into(),
            site_collections: vec!["intranet".into()],
        },
        sink: SinkConfig {
            host_url: "https://search.example.com".into(),
            source_id: "src-1".into(),
        },
        sync: SyncSettings {
            worker_count: workers,
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            enable_permissions: true,
            ..SyncSettings::default()
        },
        objects: ObjectsConfig::default(),
        state: StateConfig {
            checkpoint_path: tmp.path().join("state/checkpoint.json"),
            registry_path: tmp.path().join("state/doc_id.json"),
        },
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn full_sync_indexes_the_whole_hierarchy() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(test_config(&tmp, 1), source, Arc::clone(&sink) as Arc<dyn Sink>);

    let report = coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    assert!(report.succeeded());
    // 1 site + 1 list + 2 items.
    assert_eq!(report.documents_indexed, 4);
    assert_eq!(*sink.permission_wipes.lock().unwrap(), 1);

    let indexed = sink.indexed.lock().unwrap();
    let handbook = indexed
        .iter()
        .find(|doc| doc.fields.get("title") == Some(&json!("Handbook")))
        .expect("handbook item indexed");
    assert_eq!(
        handbook.fields.get("body"),
        Some(&json!("welcome to the handbook"))
    );
    let welcome = indexed
        .iter()
        .find(|doc| doc.fields.get("title") == Some(&json!("Welcome")))
        .expect("welcome item indexed");
    assert_eq!(welcome.fields.get("body"), Some(&Value::Null));

    // The site's role assignment resolved to its member users and the
    // group label landed on the site document.
    let site = indexed
        .iter()
        .find(|doc| doc.fields.get("title") == Some(&json!("Engineering")))
        .expect("site indexed");
    assert_eq!(site.allow_permissions, vec!["Engineers".to_string()]);
    let grants = sink.grants.lock().unwrap();
    assert!(grants.contains(&("alice".to_string(), "Engineers".to_string())));
    assert!(grants.contains(&("bob".to_string(), "Engineers".to_string())));
}

#[tokio::test]
async fn registry_snapshot_records_every_observed_id() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let registry_path = config.state.registry_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(config, source, sink);

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    let state = StateStore::new(registry_path).load();
    let registry = state.global_keys.get("intranet").expect("collection snapshot");
    // site + list + two item guids
    assert_eq!(registry.len(), 4);
    assert!(state.delete_keys.is_empty());
}

#[tokio::test]
async fn incremental_window_starts_at_the_committed_boundary() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let checkpoint_path = config.state.checkpoint_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(config, source, sink);

    coordinator
        .run_cycle(SyncMode::Incremental, now())
        .await
        .unwrap();

    let raw = std::fs::read_to_string(checkpoint_path).unwrap();
    let records: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        records["intranet"]["last_boundary"],
        json!("2024-07-01T00:00:00Z")
    );
    assert_eq!(records["intranet"]["mode"], json!("incremental"));
}

#[tokio::test]
async fn failed_indexing_keeps_the_checkpoint_at_the_window_start() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let checkpoint_path = config.state.checkpoint_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    *sink.fail_indexing.lock().unwrap() = true;
    let coordinator = Coordinator::new(config, source, Arc::clone(&sink) as Arc<dyn Sink>);

    let report = coordinator
        .run_cycle(SyncMode::Incremental, now())
        .await
        .unwrap();

    assert_eq!(report.collections_failed, vec!["intranet".to_string()]);
    let raw = std::fs::read_to_string(checkpoint_path).unwrap();
    let records: Value = serde_json::from_str(&raw).unwrap();
    // The committed boundary is the window's start, so the same window
    // is retried on the next cycle.
    assert_eq!(
        records["intranet"]["last_boundary"],
        json!("2024-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn full_sync_purges_ids_no_longer_observed() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let registry_path = config.state.registry_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator =
        Coordinator::new(config, Arc::clone(&source) as Arc<dyn SourceClient>, Arc::clone(&sink) as Arc<dyn Sink>);

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();
    assert!(sink.deleted.lock().unwrap().is_empty());

    source.remove_list();
    let report = coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    // The list and both item guids disappeared; the site survived.
    let deleted: HashSet<String> = sink.deleted.lock().unwrap().iter().cloned().collect();
    assert_eq!(
        deleted,
        HashSet::from(["list-1".to_string(), "guid-1".to_string(), "guid-2".to_string()])
    );
    assert_eq!(report.documents_deleted, 3);

    let state = StateStore::new(registry_path).load();
    let registry = state.global_keys.get("intranet").expect("collection snapshot");
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn incremental_never_deletes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator =
        Coordinator::new(config, Arc::clone(&source) as Arc<dyn SourceClient>, Arc::clone(&sink) as Arc<dyn Sink>);

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();
    source.remove_list();
    coordinator
        .run_cycle(SyncMode::Incremental, now())
        .await
        .unwrap();

    assert!(sink.deleted.lock().unwrap().is_empty());
    assert_eq!(*sink.permission_wipes.lock().unwrap(), 1);
}

#[tokio::test]
async fn unchanged_source_yields_an_identical_registry() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 1);
    let registry_path = config.state.registry_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(config, source, sink);

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();
    let first = StateStore::new(&registry_path).load();
    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();
    let second = StateStore::new(&registry_path).load();

    assert_eq!(first.global_keys, second.global_keys);
}

#[tokio::test]
async fn failed_attachment_download_keeps_the_item() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(MockSource::farm());
    *source.fail_downloads.lock().unwrap() = true;
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(
        test_config(&tmp, 1),
        Arc::clone(&source) as Arc<dyn SourceClient>,
        Arc::clone(&sink) as Arc<dyn Sink>,
    );

    let report = coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    // A download failure degrades to an empty body, not a cycle failure.
    assert!(report.succeeded());
    let indexed = sink.indexed.lock().unwrap();
    let handbook = indexed
        .iter()
        .find(|doc| doc.fields.get("title") == Some(&json!("Handbook")))
        .expect("handbook item indexed");
    assert_eq!(handbook.fields.get("body"), Some(&Value::Null));
}

#[tokio::test]
async fn failed_full_sync_never_purges() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(
        test_config(&tmp, 1),
        Arc::clone(&source) as Arc<dyn SourceClient>,
        Arc::clone(&sink) as Arc<dyn Sink>,
    );

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    // The list disappears and indexing breaks in the same cycle: its
    // absence must not read as a deletion.
    source.remove_list();
    *sink.fail_indexing.lock().unwrap() = true;
    let report = coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    assert!(!report.succeeded());
    assert!(sink.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn worker_fan_out_observes_the_same_ids_once_merged() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, 4);
    let registry_path = config.state.registry_path.clone();
    let source = Arc::new(MockSource::farm());
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Coordinator::new(config, source, Arc::clone(&sink) as Arc<dyn Sink>);

    coordinator.run_cycle(SyncMode::FullSync, now()).await.unwrap();

    // Four partitions each re-observe the canned farm; the merged
    // registry still holds each id exactly once, and the permission
    // purge ran once for the cycle, not once per partition.
    let state = StateStore::new(registry_path).load();
    let registry = state.global_keys.get("intranet").expect("collection snapshot");
    assert_eq!(registry.len(), 4);
    assert_eq!(*sink.permission_wipes.lock().unwrap(), 1);
}
