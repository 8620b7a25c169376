//! Dead-letter router
//!
//! Rejected messages are republished byte for byte to the dead-letter exchange
//! under `dead_letter.{routing_key}` with four diagnostic headers. The caller
//! acknowledges the original only after [`DeadLetterRouter::route`] returns
//! `Ok`.

use bytes::Bytes;
use canon_common::broker::{HeaderMap, MessagePublisher, DEAD_LETTER_SUBJECT_PREFIX};
use canon_common::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub const HEADER_ORIGINAL_EXCHANGE: &str = "x-original-exchange";
pub const HEADER_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";
pub const HEADER_REJECTION_REASON: &str = "x-rejection-reason";
pub const HEADER_REJECTED_AT: &str = "x-rejected-at";

pub fn dead_letter_subject(routing_key: &str) -> String {
    format!("{}.{}", DEAD_LETTER_SUBJECT_PREFIX, routing_key)
}

/// Diagnostic headers of a dead-lettered message
pub fn dead_letter_headers(
    original_exchange: &str,
    original_routing_key: &str,
    reason: &str,
    rejected_at: DateTime<Utc>,
) -> HeaderMap {
    // Header values are single line
    let reason: String = reason
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_ORIGINAL_EXCHANGE, original_exchange);
    headers.insert(HEADER_ORIGINAL_ROUTING_KEY, original_routing_key);
    headers.insert(HEADER_REJECTION_REASON, reason.as_str());
    headers.insert(
        HEADER_REJECTED_AT,
        rejected_at.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
    );
    headers
}

pub struct DeadLetterRouter {
    publisher: Arc<dyn MessagePublisher>,
    exchange: String,
    declared: bool,
}

impl DeadLetterRouter {
    pub fn new(publisher: Arc<dyn MessagePublisher>, exchange: impl Into<String>) -> Self {
        Self {
            publisher,
            exchange: exchange.into(),
            declared: false,
        }
    }

    /// Republish `body` unchanged with the rejection metadata
    pub async fn route(
        &mut self,
        original_exchange: &str,
        original_routing_key: &str,
        body: &[u8],
        reason: &str,
    ) -> Result<()> {
        if !self.declared {
            let subjects = vec![format!("{}.>", DEAD_LETTER_SUBJECT_PREFIX)];
            self.publisher
                .ensure_exchange(&self.exchange, &subjects)
                .await?;
            self.declared = true;
        }

        let headers = dead_letter_headers(original_exchange, original_routing_key, reason, Utc::now());
        let subject = dead_letter_subject(original_routing_key);

        match self
            .publisher
            .publish(subject.clone(), headers, Bytes::copy_from_slice(body))
            .await
        {
            Ok(()) => {
                info!(subject = %subject, reason, "Message dead-lettered");
                Ok(())
            },
            Err(e) => {
                warn!(subject = %subject, error = %e, "Dead-letter publish failed");
                Err(e)
            },
        }
    }
}
