//! Configuration management

use canon_common::broker::BrokerConfig;
use std::path::PathBuf;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default routes manifest location.
pub const DEFAULT_ROUTES_MANIFEST: &str = "routes.yml";

/// Default originating component identifier stamped on every envelope.
pub const DEFAULT_SOURCE_ID: &str = "ingest-watcher";

/// Default capacity of a route's discovery queue.
pub const DEFAULT_DISCOVERY_QUEUE: usize = 256;

/// Ingest watcher configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub manifest_path: PathBuf,
    pub source_id: String,
    pub discovery_queue: usize,
    pub broker: BrokerConfig,
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    ///
    /// `manifest_override` comes from the command line and wins over
    /// `CANON_ROUTES_MANIFEST`.
    pub fn load(manifest_override: Option<PathBuf>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            manifest_path: manifest_override.unwrap_or_else(|| {
                std::env::var("CANON_ROUTES_MANIFEST")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROUTES_MANIFEST))
            }),
            source_id: std::env::var("CANON_SOURCE_ID")
                .unwrap_or_else(|_| DEFAULT_SOURCE_ID.to_string()),
            discovery_queue: std::env::var("CANON_DISCOVERY_QUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DISCOVERY_QUEUE),
            broker: BrokerConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_id.trim().is_empty() {
            anyhow::bail!("CANON_SOURCE_ID cannot be empty");
        }

        if self.discovery_queue == 0 {
            anyhow::bail!("CANON_DISCOVERY_QUEUE must be greater than 0");
        }

        if self.broker.url.is_empty() {
            anyhow::bail!("NATS_URL cannot be empty");
        }

        Ok(())
    }
}
