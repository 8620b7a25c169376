//! Consumer settlement tests against in-memory broker and store

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use canon_worker::consumer::Settlement;
use canon_worker::dead_letter::{
    HEADER_ORIGINAL_EXCHANGE, HEADER_ORIGINAL_ROUTING_KEY, HEADER_REJECTED_AT,
    HEADER_REJECTION_REASON,
};
use canon_worker::transform::{CanonicalEntity, EntityKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_valid_record_is_upserted_then_acked() {
    let store = FakeStore::default();
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        store.clone(),
        publisher.clone(),
    );

    let delivery = FakeDelivery::new("reference.countries", afghanistan("officially_assigned"));
    assert_eq!(consumer.process(&delivery).await, Settlement::Persisted);
    assert_eq!(delivery.settled(), vec![Settled::Ack]);

    let state = store.state.lock().unwrap();
    match state.rows.get("AF") {
        Some(CanonicalEntity::Country(country)) => {
            assert_eq!(country.alpha3.as_deref(), Some("AFG"));
            assert_eq!(country.numeric.as_deref(), Some("004"));
        },
        other => panic!("unexpected row: {:?}", other),
    }
    assert_eq!(
        state.audit,
        vec![("ingest-watcher".to_string(), "canonicalizer".to_string())]
    );
    assert!(publisher.published().is_empty());
    assert_eq!(consumer.stats().processed, 1);
}

#[tokio::test]
async fn test_invalid_status_is_dead_lettered_byte_for_byte() {
    let store = FakeStore::default();
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        store.clone(),
        publisher.clone(),
    );

    let body = afghanistan("bogus");
    let delivery = FakeDelivery::new("reference.countries", body.clone());
    assert_eq!(consumer.process(&delivery).await, Settlement::DeadLettered);

    // Acked only after the dead-letter publish
    assert_eq!(delivery.settled(), vec![Settled::Ack]);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    let dead = &published[0];
    assert_eq!(dead.subject, "dead_letter.reference.countries");
    assert_eq!(dead.body.as_ref(), body.as_slice());
    assert_eq!(dead.header(HEADER_ORIGINAL_EXCHANGE), "reference");
    assert_eq!(dead.header(HEADER_ORIGINAL_ROUTING_KEY), "reference.countries");
    assert!(dead.header(HEADER_REJECTION_REASON).contains("bogus"));
    assert!(dead.header(HEADER_REJECTED_AT).ends_with('Z'));
    assert_eq!(publisher.exchanges(), vec!["DEAD_LETTER".to_string()]);

    assert!(store.state.lock().unwrap().rows.is_empty());
    assert_eq!(consumer.stats().rejected, 1);
}

#[tokio::test]
async fn test_missing_required_field_names_the_field() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        FakeStore::default(),
        publisher.clone(),
    );

    let body = envelope_bytes(
        "countries",
        &[("alpha2", "zz"), ("status", "exceptionally_reserved")],
    );
    let delivery = FakeDelivery::new("reference.countries", body);
    assert_eq!(consumer.process(&delivery).await, Settlement::DeadLettered);
    assert!(publisher.published()[0]
        .header(HEADER_REJECTION_REASON)
        .contains("remarks"));
}

#[tokio::test]
async fn test_skipped_record_is_acked_without_write() {
    let store = FakeStore::default();
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        store.clone(),
        publisher.clone(),
    );

    let delivery = FakeDelivery::new("reference.countries", afghanistan("formerly_used"));
    assert_eq!(consumer.process(&delivery).await, Settlement::Skipped);
    assert_eq!(delivery.settled(), vec![Settled::Ack]);
    assert_eq!(store.state.lock().unwrap().changes, 0);
    assert!(publisher.published().is_empty());
    assert_eq!(consumer.stats().skipped, 1);
}

#[tokio::test]
async fn test_transient_failure_is_redelivered_and_applied_once() {
    let store = FakeStore::failing_transiently(1);
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        store.clone(),
        publisher.clone(),
    );
    let body = afghanistan("officially_assigned");

    let first = FakeDelivery::new("reference.countries", body.clone());
    assert_eq!(consumer.process(&first).await, Settlement::Redeliver);
    assert_eq!(first.settled(), vec![Settled::Nak(Some(REDELIVERY_DELAY))]);
    assert!(publisher.published().is_empty());

    let retry = FakeDelivery::new("reference.countries", body.clone());
    assert_eq!(consumer.process(&retry).await, Settlement::Persisted);

    // A duplicate redelivery changes nothing
    let duplicate = FakeDelivery::new("reference.countries", body);
    assert_eq!(consumer.process(&duplicate).await, Settlement::Persisted);

    let state = store.state.lock().unwrap();
    assert_eq!(state.rows.len(), 1);
    assert_eq!(state.changes, 1);
    assert_eq!(state.audit.len(), 1);

    let stats = consumer.stats();
    assert_eq!(stats.redelivered, 1);
    assert_eq!(stats.processed, 2);
}

#[tokio::test]
async fn test_permanent_store_error_is_dead_lettered() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        FakeStore::refusing(),
        publisher.clone(),
    );

    let delivery = FakeDelivery::new("reference.countries", afghanistan("officially_assigned"));
    assert_eq!(consumer.process(&delivery).await, Settlement::DeadLettered);
    assert_eq!(delivery.settled(), vec![Settled::Ack]);
    assert!(publisher.published()[0]
        .header(HEADER_REJECTION_REASON)
        .starts_with("upsert failed"));
}

#[tokio::test]
async fn test_failed_dead_letter_publish_is_not_acked() {
    let publisher = Arc::new(RecordingPublisher::unreachable());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        FakeStore::default(),
        publisher,
    );

    let delivery = FakeDelivery::new("reference.countries", afghanistan("bogus"));
    assert_eq!(consumer.process(&delivery).await, Settlement::Redeliver);
    assert_eq!(delivery.settled(), vec![Settled::Nak(Some(REDELIVERY_DELAY))]);
    assert_eq!(consumer.stats().rejected, 0);
}

#[tokio::test]
async fn test_malformed_and_misaddressed_envelopes_are_dead_lettered() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut consumer = consumer(
        EntityKind::Countries,
        FakeQueue::default(),
        FakeStore::default(),
        publisher.clone(),
    );

    let garbage = FakeDelivery::new("reference.countries", b"not json".to_vec());
    assert_eq!(consumer.process(&garbage).await, Settlement::DeadLettered);

    let currency = envelope_bytes(
        "currencies",
        &[("code", "EUR"), ("name", "Euro"), ("numeric", "978"), ("status", "active")],
    );
    let misaddressed = FakeDelivery::new("reference.countries", currency);
    assert_eq!(consumer.process(&misaddressed).await, Settlement::DeadLettered);

    let published = publisher.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].body.as_ref(), b"not json");
    for dead in &published {
        assert!(dead.header(HEADER_REJECTION_REASON).starts_with("envelope rejected"));
    }
}

#[tokio::test]
async fn test_currency_consumer() {
    let store = FakeStore::default();
    let mut consumer = consumer(
        EntityKind::Currencies,
        FakeQueue::default(),
        store.clone(),
        Arc::new(RecordingPublisher::default()),
    );

    let body = envelope_bytes(
        "currencies",
        &[("code", "eur"), ("name", "Euro"), ("numeric", "978"), ("status", "active")],
    );
    let delivery = FakeDelivery::new("reference.currencies", body);
    assert_eq!(consumer.process(&delivery).await, Settlement::Persisted);
    assert!(store.state.lock().unwrap().rows.contains_key("EUR"));
}

#[tokio::test]
async fn test_run_drains_queue_until_cancelled() {
    let accepted = FakeDelivery::new("reference.countries", afghanistan("officially_assigned"));
    let skipped = FakeDelivery::new("reference.countries", afghanistan("formerly_used"));
    let rejected = FakeDelivery::new("reference.countries", afghanistan("bogus"));
    let last = rejected.settled_handle();

    let queue = FakeQueue::with(vec![accepted, skipped, rejected]);
    let consumer = consumer(
        EntityKind::Countries,
        queue,
        FakeStore::default(),
        Arc::new(RecordingPublisher::default()),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(consumer.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while last.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue was not drained");

    cancel.cancel();
    let stats = handle.await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.redelivered, 0);
}
