//! Indexing sink client.
//!
//! The pipeline pushes documents, permission grants, and deletions
//! through the [`Sink`] trait. The HTTP implementation targets a
//! Workplace-Search-style content source API: batched document
//! creation, per-user permission add/remove, and bulk destroy.
//!
//! # Credentials
//!
//! The access token is read from the `SPSYNC_SINK_TOKEN` environment
//! variable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::models::Document;

/// Narrow contract over the indexing service.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Submit one batch, returning how many documents the sink accepted
    /// (documents for which it reported no per-document error).
    async fn index_documents(&self, documents: &[Document]) -> Result<usize, SinkError>;

    /// Grant `permission` to `user`. Idempotent on the sink side; the
    /// connector never dedups grants locally.
    async fn add_permission(&self, user: &str, permission: &str) -> Result<(), SinkError>;

    /// Remove every permission previously granted through this source.
    /// Destructive full-sync prerequisite.
    async fn remove_all_permissions(&self) -> Result<(), SinkError>;

    /// Remove documents by id.
    async fn delete_documents(&self, ids: &[String]) -> Result<(), SinkError>;
}

/// Reqwest-backed sink client with bearer-token authentication.
pub struct SearchSink {
    client: reqwest::Client,
    host: String,
    source_id: String,
    token: String,
}

impl SearchSink {
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let token = std::env::var("SPSYNC_SINK_TOKEN")
            .context("SPSYNC_SINK_TOKEN environment variable not set")?;
        Ok(Self {
            client: reqwest::Client::new(),
            host: config.host_url.trim_end_matches('/').to_string(),
            source_id: config.source_id.clone(),
            token,
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/api/ws/v1/sources/{}/{}",
            self.host, self.source_id, suffix
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, SinkError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(SinkError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        resp.json().await.map_err(|source| SinkError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn get(&self, url: &str) -> Result<Value, SinkError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| SinkError::Http {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(SinkError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        resp.json().await.map_err(|source| SinkError::Http {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Sink for SearchSink {
    async fn index_documents(&self, documents: &[Document]) -> Result<usize, SinkError> {
        let url = self.endpoint("documents/bulk_create");
        let payload: Vec<Value> = documents.iter().map(Document::to_payload).collect();
        let body = self.post(&url, &Value::Array(payload)).await?;

        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| SinkError::Malformed {
                url: url.clone(),
                reason: "missing results array".to_string(),
            })?;
        let accepted = results
            .iter()
            .filter(|r| {
                r.get("errors")
                    .and_then(Value::as_array)
                    .is_none_or(|errors| errors.is_empty())
            })
            .count();
        Ok(accepted)
    }

    async fn add_permission(&self, user: &str, permission: &str) -> Result<(), SinkError> {
        let url = self.endpoint(&format!("permissions/{user}/add"));
        self.post(&url, &json!({ "permissions": [permission] }))
            .await?;
        Ok(())
    }

    async fn remove_all_permissions(&self) -> Result<(), SinkError> {
        let list_url = self.endpoint("permissions");
        let body = self.get(&list_url).await?;
        let entries = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if entries.is_empty() {
            return Ok(());
        }

        info!(users = entries.len(), "removing previously granted permissions");
        for entry in &entries {
            let Some(user) = entry.get("user").and_then(Value::as_str) else {
                continue;
            };
            let permissions = entry.get("permissions").cloned().unwrap_or(json!([]));
            let url = self.endpoint(&format!("permissions/{user}/remove"));
            self.post(&url, &json!({ "permissions": permissions }))
                .await?;
        }
        Ok(())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), SinkError> {
        let url = self.endpoint("documents/bulk_destroy");
        let payload: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
        self.post(&url, &Value::Array(payload)).await?;
        Ok(())
    }
}
