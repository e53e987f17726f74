//! At-least-once delivery through a consumer group.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use event_log::{EventConsumer, EventLog, EventProducer, InMemoryEventLog, OutboundMessage};
use tokio::sync::Mutex;

const TOPIC: &str = "fraud-check-results";

async fn publish(log: &InMemoryEventLog, count: usize) {
    for i in 0..count {
        log.send(
            OutboundMessage::new(TOPIC, format!("TXN-{i}"), format!("{{\"n\":{i}}}").into_bytes())
                .with_header("eventType", "fraud.check-completed"),
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn every_message_is_processed_despite_a_crashed_member() {
    let log = InMemoryEventLog::new();
    publish(&log, 10).await;

    // One member takes three deliveries and dies without acknowledging.
    let crashed = log.subscribe(TOPIC, "g").await.unwrap();
    for _ in 0..3 {
        crashed.next().await.unwrap();
    }
    drop(crashed);
    assert_eq!(log.recover_in_flight(TOPIC, "g").await, 3);

    let seen = Arc::new(Mutex::new(BTreeSet::new()));
    let mut workers = Vec::new();
    for _ in 0..2 {
        let consumer = log.subscribe(TOPIC, "g").await.unwrap();
        let seen = Arc::clone(&seen);
        workers.push(tokio::spawn(async move {
            while let Ok(Ok(delivery)) =
                tokio::time::timeout(Duration::from_millis(200), consumer.next()).await
            {
                assert_eq!(delivery.header("eventType"), Some("fraud.check-completed"));
                seen.lock().await.insert(delivery.offset);
                consumer.ack(&delivery).await.unwrap();
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(seen.lock().await.len(), 10);
    assert_eq!(log.acked_count(TOPIC, "g").await, 10);
    assert_eq!(log.in_flight_count(TOPIC, "g").await, 0);
}

#[tokio::test]
async fn nacked_delivery_returns_until_acknowledged() {
    let log = InMemoryEventLog::new();
    publish(&log, 1).await;
    let consumer = log.subscribe(TOPIC, "g").await.unwrap();

    for expected_attempt in 1..=3 {
        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.attempt, expected_attempt);
        consumer.nack(&delivery).await.unwrap();
    }

    let delivery = consumer.next().await.unwrap();
    consumer.ack(&delivery).await.unwrap();
    assert_eq!(delivery.attempt, 4);
    assert_eq!(log.acked_count(TOPIC, "g").await, 1);
}

#[tokio::test]
async fn outage_fails_sends_and_receives_until_recovery() {
    let log = InMemoryEventLog::new();
    let consumer = log.subscribe(TOPIC, "g").await.unwrap();
    log.set_available(false).await;

    let send = log
        .send(OutboundMessage::new(TOPIC, "TXN-1", b"{}".to_vec()))
        .await;
    assert!(send.unwrap_err().is_retryable());
    assert!(consumer.next().await.is_err());

    log.set_available(true).await;
    publish(&log, 1).await;
    assert_eq!(consumer.next().await.unwrap().offset, 0);
}
