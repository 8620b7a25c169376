//! Broker seam
//!
//! The pipeline talks to the broker through three small traits so the watcher
//! and the workers can be exercised against in-memory fakes. The production
//! implementation lives in [`nats`] and maps the contract onto JetStream:
//! an exchange is a stream, a routing key is a subject and a bound queue is a
//! durable pull consumer filtered on that subject.

pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

pub use async_nats::HeaderMap;

/// Default NATS server URL
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default exchange (stream) carrying ingested rows
pub const DEFAULT_EXCHANGE: &str = "reference";

/// Default dead-letter exchange
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "DEAD_LETTER";

/// Subject prefix used for dead-lettered messages
pub const DEAD_LETTER_SUBJECT_PREFIX: &str = "dead_letter";

/// Publishing side of the broker
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Declare an exchange if it does not exist yet. Must be idempotent.
    async fn ensure_exchange(&self, exchange: &str, subjects: &[String]) -> Result<()>;

    /// Publish a payload under a routing key and wait for the broker to accept it
    async fn publish(&self, routing_key: String, headers: HeaderMap, payload: Bytes) -> Result<()>;
}

/// A single message handed to a consumer
#[async_trait]
pub trait Delivery: Send + Sync {
    fn routing_key(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Positive acknowledgement; the broker forgets the message
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgement; the broker redelivers after `delay`
    async fn nak(&self, delay: Option<Duration>) -> Result<()>;
}

/// A bound queue a consumer drains one message at a time
#[async_trait]
pub trait MessageSource: Send {
    /// Wait up to `wait` for the next message
    async fn next_message(&mut self, wait: Duration) -> Result<Option<Box<dyn Delivery>>>;
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

impl BrokerConfig {
    /// Load from `NATS_URL` and `NATS_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("NATS_URL").unwrap_or_else(|_| DEFAULT_NATS_URL.to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("NATS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}
