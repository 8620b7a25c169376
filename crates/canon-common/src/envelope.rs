//! Message envelope exchanged between the ingest watcher and the workers
//!
//! One envelope wraps one source row. The wire format is JSON:
//!
//! ```json
//! {
//!   "domain": "reference", "entity": "countries",
//!   "timestamp": "2026-01-26T10:30:00Z",
//!   "source": "ingest-watcher", "version": "0.1.0",
//!   "hostname": "ingest-01", "sourceFile": "countries.csv",
//!   "contract": "reference.countries.csv.v1",
//!   "payload": { "alpha2": "af" }
//! }
//! ```
//!
//! Payload values are carried exactly as read from the source file. Nothing
//! upstream of the worker trims or case-folds them.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CanonError, Result};

/// Flat column-name to raw-value mapping for one source row
pub type Payload = BTreeMap<String, String>;

/// Build the routing key for a domain/entity pair
///
/// This is the only addressing scheme workers rely on, so the format
/// `{domain}.{entity}` must never change.
pub fn routing_key(domain: &str, entity: &str) -> String {
    format!("{}.{}", domain, entity)
}

/// Identity of the component that produced an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeOrigin {
    pub source: String,
    pub version: String,
    pub hostname: String,
}

impl EnvelopeOrigin {
    pub fn new(
        source: impl Into<String>,
        version: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            version: version.into(),
            hostname: hostname.into(),
        }
    }
}

/// Wire representation of one ingested row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub domain: String,
    pub entity: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    pub hostname: String,
    pub source_file: String,
    pub contract: String,
    pub payload: Payload,
}

impl MessageEnvelope {
    /// Wrap a row, stamping it with the current UTC time (second precision)
    pub fn new(
        domain: impl Into<String>,
        entity: impl Into<String>,
        contract: impl Into<String>,
        source_file: impl Into<String>,
        origin: &EnvelopeOrigin,
        payload: Payload,
    ) -> Self {
        Self {
            domain: domain.into(),
            entity: entity.into(),
            timestamp: Utc::now().trunc_subsecs(0),
            source: origin.source.clone(),
            version: origin.version.clone(),
            hostname: origin.hostname.clone(),
            source_file: source_file.into(),
            contract: contract.into(),
            payload,
        }
    }

    pub fn routing_key(&self) -> String {
        routing_key(&self.domain, &self.entity)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CanonError::InvalidEnvelope(format!("malformed envelope JSON: {}", e)))
    }

    /// Check that the envelope is addressed to the expected domain/entity
    pub fn expect_address(&self, domain: &str, entity: &str) -> Result<()> {
        if self.domain != domain || self.entity != entity {
            return Err(CanonError::InvalidEnvelope(format!(
                "expected {} but envelope is addressed to {}",
                routing_key(domain, entity),
                self.routing_key()
            )));
        }
        Ok(())
    }
}
