//! Error types for the ingest watcher

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid routes manifest: {0}")]
    InvalidManifest(String),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to read header row: {0}")]
    Header(String),

    #[error("Failed to parse row {row}: {source}")]
    Row {
        row: u64,
        #[source]
        source: csv_async::Error,
    },

    #[error("Publish failed: {0}")]
    Publish(#[from] canon_common::CanonError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl IngestError {
    /// Create an invalid manifest error
    pub fn invalid_manifest(msg: impl Into<String>) -> Self {
        Self::InvalidManifest(msg.into())
    }
}
