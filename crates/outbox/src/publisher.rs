use std::sync::Arc;
use std::time::Duration;

use common::{Schedule, SharedClock, SystemClock, TaskHandle, spawn_periodic};
use event_log::{EventProducer, OutboundMessage};

use crate::{EventEnvelope, OutboxRecord, OutboxStatus, Result, store::OutboxStore};

/// Tuning for [`OutboxPublisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Maximum records relayed per drain.
    pub batch_size: usize,
    /// Failed sends before a record becomes FAILED. The default of 1 makes
    /// the first failure terminal.
    pub max_attempts: u32,
    pub interval: Duration,
    /// Warm-up before the first drain after start.
    pub initial_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 1,
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// PENDING records picked up.
    pub selected: usize,
    pub published: usize,
    /// Records that became FAILED in this drain.
    pub failed: usize,
    /// Records whose send failed but that stay PENDING for the next drain.
    pub retrying: usize,
    /// Records skipped because the store update itself failed.
    pub skipped: usize,
}

/// Relays PENDING outbox records to the event log.
///
/// Delivery is at-least-once: a crash after the broker confirmed a send but
/// before the record was marked PUBLISHED sends it again on the next drain.
pub struct OutboxPublisher<S, P> {
    store: S,
    producer: P,
    config: PublisherConfig,
    clock: SharedClock,
}

impl<S, P> OutboxPublisher<S, P>
where
    S: OutboxStore,
    P: EventProducer,
{
    pub fn new(store: S, producer: P, config: PublisherConfig) -> Self {
        Self {
            store,
            producer,
            config,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Relays up to `batch_size` PENDING records in creation order.
    ///
    /// Per-record store failures are logged and skipped; only a failure to
    /// read the batch is returned as an error.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self, batch_size: usize) -> Result<DrainReport> {
        let batch = self.store.fetch_pending(batch_size).await?;
        let mut report = DrainReport {
            selected: batch.len(),
            ..DrainReport::default()
        };

        for record in batch {
            self.relay(record, &mut report).await;
        }

        if report.selected > 0 {
            tracing::info!(
                selected = report.selected,
                published = report.published,
                failed = report.failed,
                retrying = report.retrying,
                skipped = report.skipped,
                "outbox drain finished"
            );
        }
        Ok(report)
    }

    async fn relay(&self, record: OutboxRecord, report: &mut DrainReport) {
        let envelope = match EventEnvelope::for_record(&record) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A payload that cannot be enveloped never will be; no retries.
                self.fail(&record, &format!("invalid payload: {e}"), 0, report)
                    .await;
                return;
            }
        };

        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => {
                self.fail(&record, &format!("envelope encoding: {e}"), 0, report)
                    .await;
                return;
            }
        };

        let message = OutboundMessage::new(&record.topic, &record.aggregate_id, body)
            .with_header("eventType", &record.event_type)
            .with_header("aggregateType", &record.aggregate_type)
            .with_header("outboxId", record.id.to_string());

        match self.producer.send(message).await {
            Ok(receipt) => match self.store.mark_published(record.id, self.clock.now()).await {
                Ok(true) => {
                    metrics::counter!("outbox_published_total").increment(1);
                    tracing::debug!(
                        outbox_id = %record.id,
                        aggregate_id = %record.aggregate_id,
                        topic = %receipt.topic,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "outbox record published"
                    );
                    report.published += 1;
                }
                Ok(false) => {
                    tracing::warn!(outbox_id = %record.id, "record left PENDING before it was marked published");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(outbox_id = %record.id, error = %e, "failed to mark outbox record published");
                    report.skipped += 1;
                }
            },
            Err(e) => {
                self.fail(&record, &e.to_string(), self.config.max_attempts, report)
                    .await;
            }
        }
    }

    async fn fail(
        &self,
        record: &OutboxRecord,
        error: &str,
        max_attempts: u32,
        report: &mut DrainReport,
    ) {
        match self.store.record_failure(record.id, error, max_attempts).await {
            Ok(Some(OutboxStatus::Failed)) => {
                metrics::counter!("outbox_failed_total").increment(1);
                tracing::error!(
                    outbox_id = %record.id,
                    aggregate_id = %record.aggregate_id,
                    topic = %record.topic,
                    error,
                    "outbox record marked FAILED"
                );
                report.failed += 1;
            }
            Ok(Some(_)) => {
                tracing::warn!(
                    outbox_id = %record.id,
                    aggregate_id = %record.aggregate_id,
                    attempts = record.attempts + 1,
                    error,
                    "outbox publish failed, will retry"
                );
                report.retrying += 1;
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                tracing::error!(outbox_id = %record.id, error = %e, "failed to record outbox failure");
                report.skipped += 1;
            }
        }
    }
}

impl<S, P> OutboxPublisher<S, P>
where
    S: OutboxStore + 'static,
    P: EventProducer + 'static,
{
    /// Starts draining on the configured schedule.
    pub fn spawn(self) -> TaskHandle {
        let schedule =
            Schedule::every(self.config.interval).with_initial_delay(self.config.initial_delay);
        let publisher = Arc::new(self);

        spawn_periodic("outbox-publisher", schedule, move || {
            let publisher = Arc::clone(&publisher);
            async move {
                publisher
                    .drain(publisher.config.batch_size)
                    .await
                    .map(|_| ())
            }
        })
    }
}
