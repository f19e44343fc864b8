//! Source query endpoint client.
//!
//! The crawler talks to the source through the [`SourceClient`] trait so
//! the traversal logic stays testable with in-memory fakes. The HTTP
//! implementation targets the SharePoint REST API: list queries return
//! `{"d": {"results": [...]}}` envelopes, attachment downloads return
//! raw bytes.
//!
//! # Credentials
//!
//! Read from environment variables:
//! - `SHAREPOINT_USERNAME`: required
//! - `SHAREPOINT_PASSWORD`: required

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::Window;
use crate::config::SharepointConfig;
use crate::error::FetchError;
use crate::models::{AttrMap, ObjectKind, DATETIME_FORMAT};

/// Narrow contract over the source's query API.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// GET a relative query URL and return the result rows.
    ///
    /// `query` is appended verbatim (usually an OData `?$filter=...`
    /// string, possibly empty). A response that is not the expected
    /// envelope is a [`FetchError::Malformed`]; callers downgrade fetch
    /// errors to empty results.
    async fn fetch(&self, rel_url: &str, query: &str) -> Result<Vec<AttrMap>, FetchError>;

    /// GET raw bytes, used for attachment content.
    async fn download(&self, rel_url: &str) -> Result<Vec<u8>, FetchError>;
}

/// OData modified-time range filter for one object kind.
pub fn time_filter(kind: ObjectKind, window: &Window) -> String {
    let field = match kind {
        ObjectKind::Items => "Modified",
        _ => "LastItemModifiedDate",
    };
    format!(
        "?$filter=({field} ge datetime'{start}') and ({field} le datetime'{end}')",
        start = window.start.format(DATETIME_FORMAT),
        end = window.end.format(DATETIME_FORMAT),
    )
}

/// Escape a list title for use inside `getbytitle('...')`.
pub fn encode_title(title: &str) -> String {
    title.replace('\'', "''")
}

/// Reqwest-backed source client with basic authentication.
pub struct HttpSource {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl HttpSource {
    pub fn from_config(config: &SharepointConfig) -> Result<Self> {
        let username = std::env::var("SHAREPOINT_USERNAME")
            .context("SHAREPOINT_USERNAME environment variable not set")?;
        let password = std::env::var("SHAREPOINT_PASSWORD")
            .context("SHAREPOINT_PASSWORD environment variable not set")?;
        Ok(Self {
            client: reqwest::Client::new(),
            host: config.host_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    fn absolute(&self, rel_url: &str) -> String {
        format!("{}/{}", self.host, rel_url.trim_start_matches('/'))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json;odata=verbose")
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    async fn fetch(&self, rel_url: &str, query: &str) -> Result<Vec<AttrMap>, FetchError> {
        let url = format!("{}{}", self.absolute(rel_url), query);
        let resp = self.get(&url).await?;
        let body: Value = resp.json().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })?;
        parse_results_envelope(&url, body)
    }

    async fn download(&self, rel_url: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.absolute(rel_url);
        let resp = self.get(&url).await?;
        let bytes = resp.bytes().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Pull the rows out of a `{"d": {"results": [...]}}` envelope.
fn parse_results_envelope(url: &str, body: Value) -> Result<Vec<AttrMap>, FetchError> {
    let results = body
        .get("d")
        .and_then(|d| d.get("results"))
        .ok_or_else(|| FetchError::Malformed {
            url: url.to_string(),
            reason: "missing d.results".to_string(),
        })?;
    match results {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => Ok(rows
            .iter()
            .filter_map(|row| row.as_object().cloned())
            .collect()),
        _ => Err(FetchError::Malformed {
            url: url.to_string(),
            reason: "d.results is not an array".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn window() -> Window {
        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&Utc)
        };
        Window {
            start: parse("2024-06-01T00:00:00Z"),
            end: parse("2024-06-01T08:00:00Z"),
        }
    }

    #[test]
    fn item_filter_uses_modified() {
        let q = time_filter(ObjectKind::Items, &window());
        assert_eq!(
            q,
            "?$filter=(Modified ge datetime'2024-06-01T00:00:00Z') and (Modified le datetime'2024-06-01T08:00:00Z')"
        );
    }

    #[test]
    fn site_filter_uses_last_item_modified() {
        let q = time_filter(ObjectKind::Sites, &window());
        assert!(q.contains("LastItemModifiedDate ge datetime'2024-06-01T00:00:00Z'"));
    }

    #[test]
    fn title_encoding_doubles_quotes() {
        assert_eq!(encode_title("Bob's list"), "Bob''s list");
        assert_eq!(encode_title("plain"), "plain");
    }

    #[test]
    fn envelope_parsing_happy_path() {
        let body = json!({"d": {"results": [{"Id": 1, "Title": "A"}]}});
        let rows = parse_results_envelope("http://x", body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Title"], "A");
    }

    #[test]
    fn envelope_null_results_is_empty() {
        let body = json!({"d": {"results": null}});
        assert!(parse_results_envelope("http://x", body).unwrap().is_empty());
    }

    #[test]
    fn envelope_missing_d_is_malformed() {
        let body = json!({"value": []});
        let err = parse_results_envelope("http://x", body).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }
}
