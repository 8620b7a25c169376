//! Consumer wiring and supervision

use canon_common::broker::nats::NatsClient;
use canon_common::broker::MessagePublisher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::config::WorkerConfig;
use crate::consumer::{Consumer, ConsumerSettings, ConsumerStats};
use crate::dead_letter::DeadLetterRouter;
use crate::error::{Result, WorkerError};
use crate::repository::Repository;

/// Durable queue name of an entity's consumer
pub fn queue_name(domain: &str, entity: &str) -> String {
    format!("canon_{}_{}", domain, entity)
}

/// Declare the exchange and bind one queue per configured entity
///
/// Each consumer gets its own repository from `repository`, so audit
/// contexts are never shared.
pub async fn bind_consumers(
    config: &WorkerConfig,
    client: &NatsClient,
    mut repository: impl FnMut() -> Box<dyn Repository>,
) -> Result<Vec<(String, Consumer)>> {
    if config.entities.is_empty() {
        return Err(WorkerError::config("no entities to consume"));
    }

    let publisher: Arc<dyn MessagePublisher> = Arc::new(client.publisher());
    publisher
        .ensure_exchange(&config.exchange, &[format!("{}.>", config.domain)])
        .await?;

    let mut consumers = Vec::with_capacity(config.entities.len());
    for kind in &config.entities {
        let settings = ConsumerSettings {
            kind: *kind,
            domain: config.domain.clone(),
            exchange: config.exchange.clone(),
            redelivery_delay: config.redelivery_delay,
            fetch_wait: config.fetch_wait,
        };

        let queue = client
            .bind_queue(
                &config.exchange,
                &queue_name(&config.domain, kind.as_str()),
                &settings.routing_key(),
            )
            .await?;

        let dead_letter = DeadLetterRouter::new(publisher.clone(), &config.dead_letter_exchange);
        consumers.push((
            kind.to_string(),
            Consumer::new(settings, Box::new(queue), repository(), dead_letter),
        ));
    }

    Ok(consumers)
}

/// Run every consumer as its own task until `cancel` fires
///
/// A consumer that panics is reported by name with `None` stats; the others
/// keep draining their queues.
pub async fn run_consumers(
    consumers: Vec<(String, Consumer)>,
    cancel: CancellationToken,
) -> HashMap<String, Option<ConsumerStats>> {
    let mut tasks = JoinSet::new();
    let mut names: HashMap<Id, String> = HashMap::new();

    for (name, consumer) in consumers {
        let span = info_span!("consumer", entity = %name);
        let handle = tasks.spawn(consumer.run(cancel.clone()).instrument(span));
        names.insert(handle.id(), name);
    }

    info!(consumers = tasks.len(), "Consumers started");

    let mut results = HashMap::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, stats)) => {
                results.insert(names.remove(&id).unwrap_or_default(), Some(stats));
            },
            Err(e) => {
                let name = names.remove(&e.id()).unwrap_or_default();
                if e.is_panic() {
                    error!(entity = %name, "Consumer task panicked");
                } else {
                    error!(entity = %name, error = %e, "Consumer task cancelled");
                }
                results.insert(name, None);
            },
        }
    }

    results
}
