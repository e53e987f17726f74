//! Fraud-check hand-off across the outbox, the broker and the Fraud-Gate.

use std::time::Duration;

use common::TransactionReference;
use coordination::{DistributedLock, InMemoryCoordinationStore};
use event_log::{EventConsumer, EventLog, EventProducer, InMemoryEventLog, OutboundMessage};
use outbox::{InMemoryOutboxStore, OutboxPublisher, PublisherConfig};
use transactions::{
    ConsumerConfig, FraudCheckResult, FraudDecision, FraudResultConsumer, FraudStatus,
    InMemoryTransactionRepository, InitiateTransaction, RiskContext, Transaction,
    TransactionRepository, TransactionService, TransactionStatus,
};

const RESULTS: &str = "fraud-check-results";
const GROUP: &str = "transaction-fraud-gate";

type Service = TransactionService<InMemoryTransactionRepository, InMemoryCoordinationStore>;

async fn pending_service(reference: &str) -> (Service, InMemoryTransactionRepository) {
    let repository = InMemoryTransactionRepository::new(InMemoryOutboxStore::new());
    let service = TransactionService::new(
        repository.clone(),
        DistributedLock::new(InMemoryCoordinationStore::new()),
    );

    service
        .initiate(InitiateTransaction {
            reference: Some(reference.into()),
            account_id: "acc-42".into(),
            amount: 2500,
            currency: "USD".to_string(),
        })
        .await
        .unwrap();
    service
        .submit_for_fraud_check(
            &reference.into(),
            RiskContext {
                channel: Some("web".to_string()),
                ..RiskContext::default()
            },
        )
        .await
        .unwrap();

    (service, repository)
}

async fn wait_for_acks(log: &InMemoryEventLog, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.acked_count(RESULTS, GROUP).await < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn load(repository: &InMemoryTransactionRepository, reference: &str) -> Transaction {
    repository.get(&reference.into()).await.unwrap().unwrap()
}

fn result_message(result: &FraudCheckResult) -> OutboundMessage {
    OutboundMessage::new(
        RESULTS,
        result.transaction_reference.as_str(),
        serde_json::to_vec(result).unwrap(),
    )
}

#[tokio::test]
async fn request_relayed_and_answer_applied() {
    let (service, repository) = pending_service("TXN-100").await;
    let log = InMemoryEventLog::new();

    let publisher = OutboxPublisher::new(
        repository.outbox().clone(),
        log.clone(),
        PublisherConfig::default(),
    );
    publisher.drain(100).await.unwrap();

    // Fraud-detection service: read the request, answer in an envelope.
    let requests = log.messages("fraud-check-requests").await;
    assert_eq!(requests.len(), 1);
    let envelope: serde_json::Value = requests[0].payload_json().unwrap();
    assert_eq!(envelope["eventType"], "fraud.check-requested");
    assert_eq!(envelope["payload"]["accountId"], "acc-42");
    assert_eq!(envelope["payload"]["riskContext"]["channel"], "web");

    let answer = serde_json::json!({
        "eventType": "fraud.check-completed",
        "aggregateId": "TXN-100",
        "payload": {
            "transactionReference": envelope["payload"]["transactionReference"],
            "fraudScore": 7.5,
            "fraudStatus": "APPROVED"
        }
    });
    log.send(OutboundMessage::new(
        RESULTS,
        "TXN-100",
        serde_json::to_vec(&answer).unwrap(),
    ))
    .await
    .unwrap();

    let consumer = FraudResultConsumer::new(log.clone(), service.fraud_gate(), ConsumerConfig::default());
    let handle = consumer.start().await.unwrap();
    assert_eq!(handle.worker_count(), 3);

    wait_for_acks(&log, 1).await;
    handle.stop().await;

    let txn = load(&repository, "TXN-100").await;
    assert_eq!(txn.status, TransactionStatus::PendingAuthorization);
    assert_eq!(txn.fraud.status, FraudStatus::Approved);
    assert_eq!(txn.fraud.score, Some(7.5));
}

#[tokio::test]
async fn duplicate_result_applies_once() {
    let (service, repository) = pending_service("TXN-200").await;
    let log = InMemoryEventLog::new();
    let result = FraudCheckResult::new("TXN-200", 93.0, FraudDecision::Rejected);
    log.send(result_message(&result)).await.unwrap();
    log.send(result_message(&result)).await.unwrap();

    let handle = FraudResultConsumer::new(log.clone(), service.fraud_gate(), ConsumerConfig::default())
        .start()
        .await
        .unwrap();
    wait_for_acks(&log, 2).await;
    handle.stop().await;

    let txn = load(&repository, "TXN-200").await;
    assert_eq!(txn.status, TransactionStatus::FraudRejected);
    assert_eq!(txn.version, 3);

    // initiated, 2 status changes, request, 1 status change, assessment
    assert_eq!(repository.outbox().records_for("TXN-200").len(), 6);
}

#[tokio::test]
async fn delivery_lost_in_a_crash_is_redelivered() {
    let (service, repository) = pending_service("TXN-300").await;
    let log = InMemoryEventLog::new();
    log.send(result_message(&FraudCheckResult::new(
        "TXN-300",
        12.0,
        FraudDecision::Approved,
    )))
    .await
    .unwrap();

    // A worker receives the result and dies before committing.
    let doomed = log.subscribe(RESULTS, GROUP).await.unwrap();
    let lost = doomed.next().await.unwrap();
    assert_eq!(lost.attempt, 1);
    drop(doomed);
    assert_eq!(log.recover_in_flight(RESULTS, GROUP).await, 1);
    assert_eq!(
        load(&repository, "TXN-300").await.status,
        TransactionStatus::FraudCheckPending
    );

    let handle = FraudResultConsumer::new(log.clone(), service.fraud_gate(), ConsumerConfig::default())
        .start()
        .await
        .unwrap();
    wait_for_acks(&log, 1).await;
    handle.stop().await;

    assert_eq!(
        load(&repository, "TXN-300").await.status,
        TransactionStatus::PendingAuthorization
    );
    assert_eq!(log.in_flight_count(RESULTS, GROUP).await, 0);
}

#[tokio::test]
async fn late_conflicting_result_is_ignored() {
    let (service, repository) = pending_service("TXN-400").await;
    let log = InMemoryEventLog::new();
    log.send(result_message(&FraudCheckResult::new("TXN-400", 2.0, FraudDecision::Approved)))
        .await
        .unwrap();
    log.send(result_message(&FraudCheckResult::new("TXN-400", 99.0, FraudDecision::Rejected)))
        .await
        .unwrap();

    let handle = FraudResultConsumer::new(
        log.clone(),
        service.fraud_gate(),
        ConsumerConfig {
            concurrency: 1,
            ..ConsumerConfig::default()
        },
    )
    .start()
    .await
    .unwrap();
    wait_for_acks(&log, 2).await;
    handle.stop().await;

    let txn = load(&repository, "TXN-400").await;
    assert_eq!(txn.status, TransactionStatus::PendingAuthorization);
    assert_eq!(txn.fraud.status, FraudStatus::Approved);
}

#[tokio::test]
async fn lifecycle_continues_after_approval() {
    let (service, _) = pending_service("TXN-500").await;
    let gate = service.fraud_gate();
    gate.on_result(&FraudCheckResult::new("TXN-500", 1.0, FraudDecision::Approved))
        .await
        .unwrap();

    let reference = TransactionReference::from("TXN-500");
    for status in [
        TransactionStatus::Authorized,
        TransactionStatus::Processing,
        TransactionStatus::Captured,
        TransactionStatus::Completed,
        TransactionStatus::PartiallyRefunded,
        TransactionStatus::Refunded,
    ] {
        let txn = service
            .advance(&reference, status, format!("move to {status}"))
            .await
            .unwrap();
        assert_eq!(txn.status, status);
    }

    let txn = service.get(&reference).await.unwrap();
    assert!(txn.status.is_terminal());
    assert!(
        service
            .advance(&reference, TransactionStatus::Disputed, "too late".to_string())
            .await
            .is_err()
    );
}
