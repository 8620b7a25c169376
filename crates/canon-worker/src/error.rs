//! Error types for the canonicalization worker

use thiserror::Error;

use crate::repository::RepositoryError;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Broker(#[from] canon_common::CanonError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
