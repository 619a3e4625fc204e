//! Error types shared across the crawler and storage layers.

use std::path::PathBuf;

/// Errors from outbound HTTP against the portal.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-200 response.
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Body could not be decoded (gzip or UTF-8).
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// Errors from the document and progress stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
