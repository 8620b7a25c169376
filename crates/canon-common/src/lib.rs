//! Canon Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces of the reference-data pipeline:
//!
//! - **Envelope**: the wire format of one ingested row and its routing key
//! - **Broker**: the publish/consume seam and its NATS JetStream implementation
//! - **Logging**: process-wide and per-route `tracing` subscribers
//! - **Env**: `.env` loading ahead of argument parsing
//! - **Shutdown**: Ctrl+C / SIGTERM turned into a cancellation token
//! - **Error Handling**: the shared error and result types

pub mod broker;
pub mod env;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod shutdown;

// Re-export commonly used types
pub use envelope::{routing_key, EnvelopeOrigin, MessageEnvelope, Payload};
pub use error::{CanonError, Result};
