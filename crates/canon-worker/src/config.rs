//! Configuration management

use canon_common::broker::{BrokerConfig, DEFAULT_DEAD_LETTER_EXCHANGE, DEFAULT_EXCHANGE};
use std::time::Duration;

use crate::transform::EntityKind;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default domain the worker consumes.
pub const DEFAULT_DOMAIN: &str = "reference";

/// Default entities, one consumer each.
pub const DEFAULT_ENTITIES: &str = "countries,currencies";

/// Default delay before a nak'd message is redelivered.
pub const DEFAULT_REDELIVERY_DELAY_SECS: u64 = 5;

/// Default time a fetch waits for the next message.
pub const DEFAULT_FETCH_WAIT_SECS: u64 = 5;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/canon";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub domain: String,
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub entities: Vec<EntityKind>,
    pub redelivery_delay: Duration,
    pub fetch_wait: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let entities = parse_entities(
            &std::env::var("CANON_ENTITIES").unwrap_or_else(|_| DEFAULT_ENTITIES.to_string()),
        )?;

        let config = WorkerConfig {
            broker: BrokerConfig::from_env(),
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            domain: std::env::var("CANON_DOMAIN").unwrap_or_else(|_| DEFAULT_DOMAIN.to_string()),
            exchange: std::env::var("CANON_EXCHANGE")
                .unwrap_or_else(|_| DEFAULT_EXCHANGE.to_string()),
            dead_letter_exchange: std::env::var("CANON_DEAD_LETTER_STREAM")
                .unwrap_or_else(|_| DEFAULT_DEAD_LETTER_EXCHANGE.to_string()),
            entities,
            redelivery_delay: Duration::from_secs(
                std::env::var("CANON_REDELIVERY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REDELIVERY_DELAY_SECS),
            ),
            fetch_wait: Duration::from_secs(
                std::env::var("CANON_FETCH_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_FETCH_WAIT_SECS),
            ),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.entities.is_empty() {
            anyhow::bail!("CANON_ENTITIES must name at least one entity");
        }

        if self.domain.is_empty() || self.exchange.is_empty() || self.dead_letter_exchange.is_empty() {
            anyhow::bail!("Domain, exchange and dead-letter exchange cannot be empty");
        }

        if self.exchange == self.dead_letter_exchange {
            anyhow::bail!("Dead-letter exchange must differ from the main exchange");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.fetch_wait.is_zero() {
            anyhow::bail!("CANON_FETCH_WAIT_SECS must be greater than 0");
        }

        Ok(())
    }
}

/// Parse a comma separated entity list, dropping duplicates
pub fn parse_entities(raw: &str) -> anyhow::Result<Vec<EntityKind>> {
    let mut entities = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind: EntityKind = name.parse().map_err(anyhow::Error::msg)?;
        if !entities.contains(&kind) {
            entities.push(kind);
        }
    }
    Ok(entities)
}
