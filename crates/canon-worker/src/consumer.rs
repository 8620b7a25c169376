//! Consumer loop
//!
//! One consumer per entity drains its bound queue one message at a time:
//!
//! ```text
//! received -> transformed -> acked
//!                         -> dead-lettered, then acked
//!                         -> nak'd for redelivery
//! ```
//!
//! A message is acknowledged only once its fate is durable: after the upsert,
//! or after the dead-letter publish. Transient store failures and failed
//! dead-letter publishes are nak'd so the broker redelivers them.

use canon_common::broker::{Delivery, MessageSource};
use canon_common::MessageEnvelope;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dead_letter::DeadLetterRouter;
use crate::repository::{Repository, AUDIT_SOURCE_USER};
use crate::transform::{CanonicalEntity, EntityKind, Outcome, TransformError};

/// Pause after a failed fetch before pulling again
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Counters reported when a consumer stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub redelivered: u64,
}

/// How a message was settled with the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Persisted,
    Skipped,
    DeadLettered,
    Redeliver,
}

pub struct ConsumerSettings {
    pub kind: EntityKind,
    pub domain: String,
    pub exchange: String,
    pub redelivery_delay: Duration,
    pub fetch_wait: Duration,
}

impl ConsumerSettings {
    pub fn routing_key(&self) -> String {
        canon_common::routing_key(&self.domain, self.kind.as_str())
    }
}

pub struct Consumer {
    settings: ConsumerSettings,
    source: Box<dyn MessageSource>,
    repository: Box<dyn Repository>,
    dead_letter: DeadLetterRouter,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(
        settings: ConsumerSettings,
        source: Box<dyn MessageSource>,
        repository: Box<dyn Repository>,
        dead_letter: DeadLetterRouter,
    ) -> Self {
        Self {
            settings,
            source,
            repository,
            dead_letter,
            stats: ConsumerStats::default(),
        }
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Drain the queue until `cancel` fires
    ///
    /// Cancellation is checked before every pull; a message already received
    /// is always settled before the loop exits.
    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerStats {
        info!(
            entity = %self.settings.kind,
            routing_key = %self.settings.routing_key(),
            "Consumer started"
        );

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.source.next_message(self.settings.fetch_wait) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.process(delivery.as_ref()).await;
                },
                Ok(None) => debug!("No message within fetch window"),
                Err(e) => {
                    error!(error = %e, "Fetch failed");
                    tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                },
            }
        }

        info!(
            entity = %self.settings.kind,
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            rejected = self.stats.rejected,
            redelivered = self.stats.redelivered,
            "Consumer stopped"
        );
        self.stats
    }

    /// Transform one message and settle it with the broker
    #[instrument(skip_all, fields(entity = %self.settings.kind, routing_key = delivery.routing_key()))]
    pub async fn process(&mut self, delivery: &dyn Delivery) -> Settlement {
        let body = delivery.payload();

        let (source, outcome) = match self.decode(body) {
            Ok(envelope) => (envelope.source.clone(), self.settings.kind.transform(&envelope.payload)),
            Err(error) => (String::new(), Outcome::Rejected(error)),
        };

        match outcome {
            Outcome::Accepted(entity) => self.persist(delivery, &source, &entity).await,
            Outcome::Skipped { key, reason } => {
                warn!(key = %key, reason = %reason, "Record skipped");
                self.stats.skipped += 1;
                ack(delivery).await;
                Settlement::Skipped
            },
            Outcome::Rejected(error) => {
                warn!(error = %error, "Record rejected");
                self.dead_letter(delivery, &error.to_string()).await
            },
        }
    }

    fn decode(&self, body: &[u8]) -> Result<MessageEnvelope, TransformError> {
        let envelope =
            MessageEnvelope::from_slice(body).map_err(|e| TransformError::Envelope(e.to_string()))?;
        envelope
            .expect_address(&self.settings.domain, self.settings.kind.as_str())
            .map_err(|e| TransformError::Envelope(e.to_string()))?;
        Ok(envelope)
    }

    async fn persist(
        &mut self,
        delivery: &dyn Delivery,
        source: &str,
        entity: &CanonicalEntity,
    ) -> Settlement {
        self.repository.set_audit_context(source, AUDIT_SOURCE_USER);

        match self.repository.upsert(entity).await {
            Ok(()) => {
                debug!(key = entity.natural_key(), "Record upserted");
                self.stats.processed += 1;
                ack(delivery).await;
                Settlement::Persisted
            },
            Err(e) if e.is_transient() => {
                warn!(key = entity.natural_key(), error = %e, "Upsert failed, redelivering");
                self.redeliver(delivery).await
            },
            Err(e) => {
                error!(key = entity.natural_key(), error = %e, "Upsert refused");
                self.dead_letter(delivery, &format!("upsert failed: {}", e)).await
            },
        }
    }

    async fn dead_letter(&mut self, delivery: &dyn Delivery, reason: &str) -> Settlement {
        let routed = self
            .dead_letter
            .route(
                &self.settings.exchange,
                delivery.routing_key(),
                delivery.payload(),
                reason,
            )
            .await;

        match routed {
            Ok(()) => {
                self.stats.rejected += 1;
                ack(delivery).await;
                Settlement::DeadLettered
            },
            Err(_) => self.redeliver(delivery).await,
        }
    }

    async fn redeliver(&mut self, delivery: &dyn Delivery) -> Settlement {
        self.stats.redelivered += 1;
        if let Err(e) = delivery.nak(Some(self.settings.redelivery_delay)).await {
            // Redelivered anyway once the ack wait expires
            error!(error = %e, "Nak failed");
        }
        Settlement::Redeliver
    }
}

async fn ack(delivery: &dyn Delivery) {
    if let Err(e) = delivery.ack().await {
        error!(error = %e, "Ack failed");
    }
}
