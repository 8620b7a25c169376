//! In-memory broker and store fakes for canon-worker integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use canon_common::broker::{Delivery, HeaderMap, MessagePublisher, MessageSource};
use canon_common::{CanonError, EnvelopeOrigin, MessageEnvelope, Payload};
use canon_worker::consumer::{Consumer, ConsumerSettings};
use canon_worker::dead_letter::DeadLetterRouter;
use canon_worker::repository::{Repository, RepositoryError};
use canon_worker::transform::{CanonicalEntity, EntityKind};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Ack,
    Nak(Option<Duration>),
}

pub struct FakeDelivery {
    routing_key: String,
    body: Vec<u8>,
    settled: Arc<Mutex<Vec<Settled>>>,
}

impl FakeDelivery {
    pub fn new(routing_key: &str, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.to_string(),
            body,
            settled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn settled(&self) -> Vec<Settled> {
        self.settled.lock().unwrap().clone()
    }

    pub fn settled_handle(&self) -> Arc<Mutex<Vec<Settled>>> {
        self.settled.clone()
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn payload(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) -> canon_common::Result<()> {
        self.settled.lock().unwrap().push(Settled::Ack);
        Ok(())
    }

    async fn nak(&self, delay: Option<Duration>) -> canon_common::Result<()> {
        self.settled.lock().unwrap().push(Settled::Nak(delay));
        Ok(())
    }
}

/// Queue handing out prepared deliveries, then nothing
#[derive(Default)]
pub struct FakeQueue {
    pending: VecDeque<Box<dyn Delivery>>,
}

impl FakeQueue {
    pub fn with(deliveries: Vec<FakeDelivery>) -> Self {
        Self {
            pending: deliveries
                .into_iter()
                .map(|d| Box::new(d) as Box<dyn Delivery>)
                .collect(),
        }
    }
}

#[async_trait]
impl MessageSource for FakeQueue {
    async fn next_message(&mut self, wait: Duration) -> canon_common::Result<Option<Box<dyn Delivery>>> {
        match self.pending.pop_front() {
            Some(delivery) => Ok(Some(delivery)),
            None => {
                tokio::time::sleep(wait).await;
                Ok(None)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub subject: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Published {
    pub fn header(&self, name: &str) -> String {
        self.headers.get(name).unwrap().as_str().to_string()
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    exchanges: Mutex<Vec<String>>,
    unreachable: AtomicBool,
}

impl RecordingPublisher {
    pub fn unreachable() -> Self {
        let publisher = Self::default();
        publisher.unreachable.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn ensure_exchange(&self, exchange: &str, _subjects: &[String]) -> canon_common::Result<()> {
        self.exchanges.lock().unwrap().push(exchange.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> canon_common::Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CanonError::broker("dead-letter exchange unreachable"));
        }
        self.published.lock().unwrap().push(Published {
            subject: routing_key,
            headers,
            body: payload,
        });
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
pub struct StoreState {
    pub rows: HashMap<String, CanonicalEntity>,
    /// Writes that changed a row, i.e. audit entries
    pub changes: u32,
    pub audit: Vec<(String, String)>,
    pub transient_failures: u32,
    pub refuse: bool,
}

/// Idempotent in-memory store
#[derive(Clone, Default)]
pub struct FakeStore {
    pub state: Arc<Mutex<StoreState>>,
    audit: Option<(String, String)>,
}

impl FakeStore {
    pub fn failing_transiently(times: u32) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().transient_failures = times;
        store
    }

    pub fn refusing() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().refuse = true;
        store
    }
}

#[async_trait]
impl Repository for FakeStore {
    fn set_audit_context(&mut self, source_system: &str, source_user: &str) {
        self.audit = Some((source_system.to_string(), source_user.to_string()));
    }

    async fn upsert(&mut self, entity: &CanonicalEntity) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RepositoryError::Unavailable("connection reset".to_string()));
        }
        if state.refuse {
            return Err(RepositoryError::Refused("check constraint violated".to_string()));
        }

        let key = entity.natural_key().to_string();
        if state.rows.get(&key) != Some(entity) {
            state.rows.insert(key, entity.clone());
            state.changes += 1;
            if let Some(audit) = self.audit.clone() {
                state.audit.push(audit);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

pub fn settings(kind: EntityKind) -> ConsumerSettings {
    ConsumerSettings {
        kind,
        domain: "reference".to_string(),
        exchange: "reference".to_string(),
        redelivery_delay: REDELIVERY_DELAY,
        fetch_wait: Duration::from_millis(10),
    }
}

pub fn consumer(
    kind: EntityKind,
    queue: FakeQueue,
    store: FakeStore,
    publisher: Arc<RecordingPublisher>,
) -> Consumer {
    Consumer::new(
        settings(kind),
        Box::new(queue),
        Box::new(store),
        DeadLetterRouter::new(publisher as Arc<dyn MessagePublisher>, "DEAD_LETTER"),
    )
}

pub fn envelope_bytes(entity: &str, pairs: &[(&str, &str)]) -> Vec<u8> {
    let payload: Payload = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    MessageEnvelope::new(
        "reference",
        entity,
        format!("reference.{}.csv.v1", entity),
        format!("{}.csv", entity),
        &EnvelopeOrigin::new("ingest-watcher", "0.1.0", "test-host"),
        payload,
    )
    .to_bytes()
    .unwrap()
}

pub fn afghanistan(status: &str) -> Vec<u8> {
    envelope_bytes(
        "countries",
        &[
            ("alpha2", "af"),
            ("alpha3", "afg"),
            ("numeric", "4"),
            ("name_en", "Afghanistan"),
            ("name_fr", "Afghanistan (l')"),
            ("status", status),
        ],
    )
}
