//! Typed errors for the individual source, sink, and extraction calls.
//! The orchestration layers stay on `anyhow`; these enums exist so the
//! crawl loops can tell transport failures, bad statuses, and malformed
//! payloads apart when deciding what degrades and what fails a cycle.

use thiserror::Error;

/// A single source query or download that did not produce rows.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("unexpected payload from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// A single sink call that the index did not accept.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("unexpected payload from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// Attachment bytes that yielded no text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("attachment is empty")]
    Empty,
    #[error("pdf extraction failed: {0}")]
    Pdf(String),
    #[error("docx extraction failed: {0}")]
    Docx(String),
}
