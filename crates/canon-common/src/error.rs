//! Error types shared by the canon crates

use thiserror::Error;

/// Result type alias for canon operations
pub type Result<T> = std::result::Result<T, CanonError>;

/// Main error type for the shared layer
#[derive(Error, Debug)]
pub enum CanonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl CanonError {
    /// Create a broker error
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
