//! Consumer group feeding fraud-check results into the [`FraudGate`].
//!
//! Each worker owns one group member. A delivery is acknowledged only after
//! its effects are committed; a retryable failure is nacked so the broker
//! redelivers it, and results that can never apply are logged and
//! acknowledged so they do not block the partition.

use std::sync::Arc;
use std::time::Duration;

use coordination::CoordinationStore;
use event_log::{Delivery, EventConsumer, EventLog};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{FraudCheckResult, FraudGate, FraudOutcome, Result, TransactionError, TransactionRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Number of workers, each with its own group member.
    pub concurrency: usize,
    /// Pause after a failed receive before polling again.
    pub error_backoff: Duration,
    /// Pause after returning a delivery for its first redelivery. Doubles
    /// with every further attempt up to `max_redelivery_backoff`.
    pub redelivery_backoff: Duration,
    pub max_redelivery_backoff: Duration,
}

impl ConsumerConfig {
    /// Pause before polling again after `attempt` failed with a retryable error.
    pub fn redelivery_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.redelivery_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_redelivery_backoff)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "fraud-check-results".to_string(),
            group: "transaction-fraud-gate".to_string(),
            concurrency: 3,
            error_backoff: Duration::from_secs(1),
            redelivery_backoff: Duration::from_millis(200),
            max_redelivery_backoff: Duration::from_secs(30),
        }
    }
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Committed, then acknowledged.
    Applied,
    /// Already committed earlier; acknowledged.
    Duplicate,
    /// Transaction had moved on; acknowledged.
    Ignored,
    /// Could never apply (undecodable, unknown transaction); acknowledged.
    Discarded,
    /// Retryable failure; returned to the broker.
    Redelivered,
}

/// Decodes and applies one delivery, then settles it with the broker.
pub async fn process_delivery<R, C, K>(
    gate: &FraudGate<R, C>,
    consumer: &K,
    delivery: &Delivery,
) -> DeliveryOutcome
where
    R: TransactionRepository,
    C: CoordinationStore,
    K: EventConsumer + ?Sized,
{
    let result = match FraudCheckResult::decode(&delivery.payload) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                topic = %delivery.topic,
                offset = delivery.offset,
                error = %e,
                "discarding undecodable fraud result"
            );
            acknowledge(consumer, delivery).await;
            return DeliveryOutcome::Discarded;
        }
    };

    match gate.on_result(&result).await {
        Ok(outcome) => {
            acknowledge(consumer, delivery).await;
            match outcome {
                FraudOutcome::Applied { .. } => DeliveryOutcome::Applied,
                FraudOutcome::Duplicate => DeliveryOutcome::Duplicate,
                FraudOutcome::Ignored { .. } => DeliveryOutcome::Ignored,
            }
        }
        Err(TransactionError::NotFound(reference)) => {
            tracing::warn!(%reference, offset = delivery.offset, "fraud result for unknown transaction");
            acknowledge(consumer, delivery).await;
            DeliveryOutcome::Discarded
        }
        Err(e) if e.is_retryable() => {
            tracing::warn!(
                reference = %result.transaction_reference,
                attempt = delivery.attempt,
                error = %e,
                "fraud result not applied; returning for redelivery"
            );
            if let Err(nack_error) = consumer.nack(delivery).await {
                tracing::error!(error = %nack_error, offset = delivery.offset, "nack failed");
            }
            DeliveryOutcome::Redelivered
        }
        Err(e) => {
            tracing::error!(
                reference = %result.transaction_reference,
                error = %e,
                "fraud result rejected; discarding"
            );
            acknowledge(consumer, delivery).await;
            DeliveryOutcome::Discarded
        }
    }
}

async fn acknowledge<K: EventConsumer + ?Sized>(consumer: &K, delivery: &Delivery) {
    // An unacknowledged delivery comes back and is deduplicated by the gate.
    if let Err(e) = consumer.ack(delivery).await {
        tracing::warn!(error = %e, offset = delivery.offset, "ack failed; delivery will repeat");
    }
}

/// Runs `concurrency` workers on the fraud-result topic.
pub struct FraudResultConsumer<L, R, C> {
    log: L,
    gate: Arc<FraudGate<R, C>>,
    config: ConsumerConfig,
}

impl<L, R, C> FraudResultConsumer<L, R, C>
where
    L: EventLog,
    R: TransactionRepository + 'static,
    C: CoordinationStore + 'static,
{
    pub fn new(log: L, gate: FraudGate<R, C>, config: ConsumerConfig) -> Self {
        Self {
            log,
            gate: Arc::new(gate),
            config,
        }
    }

    /// Joins the group with every worker, then starts them.
    ///
    /// Fails without starting anything if any subscription fails.
    pub async fn start(self) -> Result<ConsumerHandle> {
        let concurrency = self.config.concurrency.max(1);
        let mut members = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            members.push(
                self.log
                    .subscribe(&self.config.topic, &self.config.group)
                    .await?,
            );
        }

        let (shutdown, stop_rx) = watch::channel(false);
        let workers = members
            .into_iter()
            .enumerate()
            .map(|(worker, consumer)| {
                tokio::spawn(run_worker(
                    worker,
                    consumer,
                    Arc::clone(&self.gate),
                    self.config.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group,
            concurrency,
            "fraud result consumer started"
        );
        Ok(ConsumerHandle { shutdown, workers })
    }
}

async fn run_worker<K, R, C>(
    worker: usize,
    consumer: K,
    gate: Arc<FraudGate<R, C>>,
    config: ConsumerConfig,
    mut stop_rx: watch::Receiver<bool>,
) where
    K: EventConsumer,
    R: TransactionRepository,
    C: CoordinationStore,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = consumer.next() => next,
        };

        let pause = match next {
            Ok(delivery) => {
                let outcome = process_delivery(gate.as_ref(), &consumer, &delivery).await;
                tracing::debug!(worker, offset = delivery.offset, ?outcome, "delivery settled");
                // The broker hands a nacked delivery straight back.
                (outcome == DeliveryOutcome::Redelivered)
                    .then(|| config.redelivery_delay(delivery.attempt))
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "receive failed");
                Some(config.error_backoff)
            }
        };

        if let Some(pause) = pause {
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                _ = stop_rx.changed() => break,
            }
        }
    }
    tracing::info!(worker, "fraud result worker stopped");
}

/// Handle to the running workers.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops every worker after its current delivery and waits for them.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await
                && e.is_panic()
            {
                tracing::error!("fraud result worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use coordination::{DistributedLock, InMemoryCoordinationStore};
    use event_log::{EventProducer, InMemoryEventLog, OutboundMessage};
    use outbox::InMemoryOutboxStore;

    use super::*;
    use crate::{
        FraudDecision, InMemoryTransactionRepository, InitiateTransaction, RiskContext,
        TransactionService, TransactionStatus,
    };

    async fn setup() -> (
        FraudGate<InMemoryTransactionRepository, InMemoryCoordinationStore>,
        InMemoryTransactionRepository,
        InMemoryEventLog,
    ) {
        let repository = InMemoryTransactionRepository::new(InMemoryOutboxStore::new());
        let service = TransactionService::new(
            repository.clone(),
            DistributedLock::new(InMemoryCoordinationStore::new()),
        );
        service
            .initiate(InitiateTransaction {
                reference: Some("TXN-1".into()),
                account_id: "acc-1".into(),
                amount: 100,
                currency: "EUR".to_string(),
            })
            .await
            .unwrap();
        service
            .submit_for_fraud_check(&"TXN-1".into(), RiskContext::default())
            .await
            .unwrap();
        (service.fraud_gate(), repository, InMemoryEventLog::new())
    }

    async fn publish(log: &InMemoryEventLog, body: &[u8]) {
        log.send(OutboundMessage::new("fraud-check-results", "TXN-1", body.to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn applied_result_is_acked() {
        let (gate, repository, log) = setup().await;
        let result = FraudCheckResult::new("TXN-1", 4.0, FraudDecision::Approved);
        publish(&log, &serde_json::to_vec(&result).unwrap()).await;

        let consumer = log.subscribe("fraud-check-results", "g").await.unwrap();
        let delivery = consumer.next().await.unwrap();

        assert_eq!(
            process_delivery(&gate, &consumer, &delivery).await,
            DeliveryOutcome::Applied
        );
        assert_eq!(log.acked_count("fraud-check-results", "g").await, 1);
        let txn = repository.get(&"TXN-1".into()).await.unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::PendingAuthorization);
    }

    #[tokio::test]
    async fn undecodable_and_unknown_results_are_discarded() {
        let (gate, _, log) = setup().await;
        publish(&log, b"{not json").await;
        let unknown = FraudCheckResult::new("TXN-404", 4.0, FraudDecision::Approved);
        publish(&log, &serde_json::to_vec(&unknown).unwrap()).await;

        let consumer = log.subscribe("fraud-check-results", "g").await.unwrap();
        for _ in 0..2 {
            let delivery = consumer.next().await.unwrap();
            assert_eq!(
                process_delivery(&gate, &consumer, &delivery).await,
                DeliveryOutcome::Discarded
            );
        }
        assert_eq!(log.acked_count("fraud-check-results", "g").await, 2);
        assert_eq!(log.in_flight_count("fraud-check-results", "g").await, 0);
    }

    #[test]
    fn redelivery_delay_doubles_up_to_the_cap() {
        let config = ConsumerConfig {
            redelivery_backoff: Duration::from_millis(100),
            max_redelivery_backoff: Duration::from_secs(1),
            ..ConsumerConfig::default()
        };

        assert_eq!(config.redelivery_delay(1), Duration::from_millis(100));
        assert_eq!(config.redelivery_delay(2), Duration::from_millis(200));
        assert_eq!(config.redelivery_delay(4), Duration::from_millis(800));
        assert_eq!(config.redelivery_delay(5), Duration::from_secs(1));
        assert_eq!(config.redelivery_delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_backs_off_while_the_outbox_is_offline() {
        let (gate, repository, log) = setup().await;
        let result = FraudCheckResult::new("TXN-1", 4.0, FraudDecision::Approved);
        publish(&log, &serde_json::to_vec(&result).unwrap()).await;
        repository.outbox().set_available(false);

        let config = ConsumerConfig {
            concurrency: 1,
            redelivery_backoff: Duration::from_millis(100),
            max_redelivery_backoff: Duration::from_secs(10),
            ..ConsumerConfig::default()
        };
        let handle = FraudResultConsumer::new(log.clone(), gate, config)
            .start()
            .await
            .unwrap();

        // Attempts start at 0, 100, 300, 700 and 1500 ms.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.stop().await;

        let consumer = log.subscribe("fraud-check-results", "transaction-fraud-gate").await.unwrap();
        let redelivered = consumer.next().await.unwrap();
        assert_eq!(redelivered.attempt, 5);
        assert_eq!(log.acked_count("fraud-check-results", "transaction-fraud-gate").await, 0);
    }

    #[tokio::test]
    async fn outbox_outage_nacks_for_redelivery() {
        let (gate, repository, log) = setup().await;
        let result = FraudCheckResult::new("TXN-1", 4.0, FraudDecision::Approved);
        publish(&log, &serde_json::to_vec(&result).unwrap()).await;
        let consumer = log.subscribe("fraud-check-results", "g").await.unwrap();

        repository.outbox().set_available(false);
        let first = consumer.next().await.unwrap();
        assert_eq!(
            process_delivery(&gate, &consumer, &first).await,
            DeliveryOutcome::Redelivered
        );
        assert_eq!(log.acked_count("fraud-check-results", "g").await, 0);

        repository.outbox().set_available(true);
        let again = consumer.next().await.unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(
            process_delivery(&gate, &consumer, &again).await,
            DeliveryOutcome::Applied
        );
    }
}
