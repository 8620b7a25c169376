//! Shared fixtures for canon-ingest integration tests
//!
//! Routes are rooted in a temporary folder and publish into an in-memory
//! broker that records every message.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use canon_common::broker::{HeaderMap, MessagePublisher};
use canon_common::{CanonError, EnvelopeOrigin, MessageEnvelope};
use canon_ingest::dispatcher::Dispatcher;
use canon_ingest::publisher::Publisher;
use canon_ingest::route::{Route, RoutesManifest};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Broker fake recording published messages
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<(String, Bytes)>>,
    exchanges: Mutex<Vec<String>>,
    fail_on: Option<usize>,
    attempts: AtomicUsize,
    ticks: Option<Arc<AtomicU64>>,
    samples: Mutex<Vec<u64>>,
}

impl RecordingBroker {
    /// Broker whose `n`th publish (1-based) fails
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on: Some(n),
            ..Default::default()
        }
    }

    /// Broker noting the value of `ticks` at every publish
    pub fn sampling(ticks: Arc<AtomicU64>) -> Self {
        Self {
            ticks: Some(ticks),
            ..Default::default()
        }
    }

    pub fn samples(&self) -> Vec<u64> {
        self.samples.lock().unwrap().clone()
    }

    pub fn envelopes(&self) -> Vec<MessageEnvelope> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| MessageEnvelope::from_slice(body).unwrap())
            .collect()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for RecordingBroker {
    async fn ensure_exchange(&self, exchange: &str, _subjects: &[String]) -> canon_common::Result<()> {
        self.exchanges.lock().unwrap().push(exchange.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: String,
        _headers: HeaderMap,
        payload: Bytes,
    ) -> canon_common::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(attempt) {
            return Err(CanonError::broker("broker unreachable"));
        }
        if let Some(ref ticks) = self.ticks {
            self.samples.lock().unwrap().push(ticks.load(Ordering::SeqCst));
        }
        self.published.lock().unwrap().push((routing_key, payload));
        Ok(())
    }
}

pub const POLL: &str = "{ mode: poll, interval_secs: 1 }";

/// Single polled route rooted at `root`
pub fn route(root: &Path, name: &str, entity: &str, extra: &str) -> Route {
    route_with_detection(root, name, entity, POLL, extra)
}

/// Single-route manifest rooted at `root` with the given detection block
pub fn route_with_detection(
    root: &Path,
    name: &str,
    entity: &str,
    detection: &str,
    extra: &str,
) -> Route {
    let manifest = format!(
        r#"
routes:
  - name: {name}
    domain: reference
    entity: {entity}
    root: {root}
    settle_ms: 0
    suffix_filter: ".csv"
    detection: {detection}
{extra}
"#,
        detection = detection,
        name = name,
        entity = entity,
        root = root.display(),
        extra = extra,
    );
    let route = RoutesManifest::parse(&manifest).unwrap().remove(0);
    std::fs::create_dir_all(&route.input_dir).unwrap();
    route
}

pub const BROKER_OUTPUT: &str = "    outputs:\n      broker:\n        exchange: reference\n";

pub fn origin() -> EnvelopeOrigin {
    EnvelopeOrigin::new("ingest-watcher", "0.1.0", "test-host")
}

pub fn dispatcher(route: &Route, broker: Arc<RecordingBroker>) -> Dispatcher {
    let publisher = Publisher::new(route, Some(broker as Arc<dyn MessagePublisher>)).unwrap();
    Dispatcher::new(Arc::new(route.clone()), origin(), publisher)
}

pub fn files_in(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        },
        Err(_) => Vec::new(),
    }
}
