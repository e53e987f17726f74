use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{NewOutboxEvent, OutboxId, OutboxRecord, OutboxStatus, Result};

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

/// Storage for outbox records.
///
/// Status updates are conditional on the record still being PENDING, so a
/// record is published at most once even if two publishers race.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stages a single event in its own local transaction.
    ///
    /// Business code should prefer the store's transactional entry point so
    /// the record commits together with the mutation it describes.
    async fn append(&self, event: NewOutboxEvent) -> Result<OutboxRecord>;

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>>;

    /// Returns up to `limit` PENDING records, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// PENDING → PUBLISHED. Returns false if the record was no longer PENDING.
    async fn mark_published(&self, id: OutboxId, published_at: DateTime<Utc>) -> Result<bool>;

    /// Counts a failed relay attempt and stores `error`.
    ///
    /// The record becomes FAILED once its attempts reach `max_attempts`.
    /// Returns the resulting status, or `None` if the record was no longer
    /// PENDING.
    async fn record_failure(
        &self,
        id: OutboxId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>>;

    /// FAILED → PENDING with attempts reset. The last error is kept.
    async fn requeue_failed(&self, id: OutboxId) -> Result<bool>;

    /// Deletes PUBLISHED records published before `cutoff`.
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count_by_status(&self) -> Result<StatusCounts>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<T> {
    async fn append(&self, event: NewOutboxEvent) -> Result<OutboxRecord> {
        (**self).append(event).await
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        (**self).get(id).await
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        (**self).fetch_pending(limit).await
    }

    async fn mark_published(&self, id: OutboxId, published_at: DateTime<Utc>) -> Result<bool> {
        (**self).mark_published(id, published_at).await
    }

    async fn record_failure(
        &self,
        id: OutboxId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>> {
        (**self).record_failure(id, error, max_attempts).await
    }

    async fn requeue_failed(&self, id: OutboxId) -> Result<bool> {
        (**self).requeue_failed(id).await
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        (**self).delete_published_before(cutoff).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        (**self).count_by_status().await
    }
}
