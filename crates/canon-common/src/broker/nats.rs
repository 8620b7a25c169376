//! NATS JetStream implementation of the broker seam

use async_nats::jetstream::{self, consumer::pull, stream::Config as StreamConfig, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{BrokerConfig, Delivery, HeaderMap, MessagePublisher, MessageSource};
use crate::error::{CanonError, Result};

pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        info!(
            url = %config.url,
            timeout_ms = config.connect_timeout.as_millis(),
            "Connecting to NATS"
        );

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connect_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| CanonError::broker(format!("failed to connect to NATS: {}", e)))?;

        info!("Successfully connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Publisher handle sharing this connection
    pub fn publisher(&self) -> NatsPublisher {
        NatsPublisher {
            context: self.jetstream.clone(),
        }
    }

    /// Bind a durable pull consumer that holds at most one unacknowledged message
    pub async fn bind_queue(
        &self,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
    ) -> Result<NatsQueue> {
        let config = pull::Config {
            name: Some(queue_name.to_string()),
            durable_name: Some(queue_name.to_string()),
            filter_subject: routing_key.to_string(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_ack_pending: 1,
            ..Default::default()
        };

        let consumer = self
            .jetstream
            .create_consumer_on_stream(config, exchange)
            .await
            .map_err(|e| CanonError::broker(format!("failed to bind queue {}: {}", queue_name, e)))?;

        info!(
            exchange = exchange,
            queue = queue_name,
            routing_key = routing_key,
            "Queue bound"
        );

        Ok(NatsQueue { consumer })
    }
}

/// Publisher over a JetStream context
#[derive(Clone)]
pub struct NatsPublisher {
    context: jetstream::Context,
}

#[async_trait]
impl MessagePublisher for NatsPublisher {
    async fn ensure_exchange(&self, exchange: &str, subjects: &[String]) -> Result<()> {
        if self.context.get_stream(exchange).await.is_ok() {
            debug!(exchange = exchange, "Exchange already exists");
            return Ok(());
        }

        let config = StreamConfig {
            name: exchange.to_string(),
            subjects: subjects.to_vec(),
            ..Default::default()
        };

        // get_or_create tolerates a concurrent declaration by another route
        self.context
            .get_or_create_stream(config)
            .await
            .map_err(|e| CanonError::broker(format!("failed to declare exchange {}: {}", exchange, e)))?;

        info!(exchange = exchange, subjects = ?subjects, "Declared exchange");
        Ok(())
    }

    #[instrument(skip(self, headers, payload), fields(routing_key = %routing_key, payload_size = payload.len()))]
    async fn publish(&self, routing_key: String, headers: HeaderMap, payload: Bytes) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(routing_key, headers, payload)
            .await
            .map_err(|e| CanonError::broker(format!("failed to publish: {}", e)))?;

        ack.await
            .map_err(|e| CanonError::broker(format!("publish not acknowledged: {}", e)))?;
        Ok(())
    }
}

/// Durable pull consumer
pub struct NatsQueue {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl MessageSource for NatsQueue {
    async fn next_message(&mut self, wait: Duration) -> Result<Option<Box<dyn Delivery>>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| CanonError::broker(format!("failed to fetch: {}", e)))?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(NatsDelivery { message }))),
            Some(Err(e)) => Err(CanonError::broker(format!("failed to receive message: {}", e))),
            None => Ok(None),
        }
    }
}

struct NatsDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn routing_key(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| CanonError::broker(format!("failed to ack: {}", e)))
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| CanonError::broker(format!("failed to nak: {}", e)))
    }
}
