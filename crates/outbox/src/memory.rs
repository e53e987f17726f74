use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SharedClock, SystemClock};

use crate::{
    NewOutboxEvent, OutboxError, OutboxId, OutboxRecord, OutboxStatus, Result, StatusCounts,
    store::OutboxStore,
};

/// In-memory outbox store for testing and single-process deployments.
///
/// [`InMemoryOutboxStore::atomically`] plays the role of the local database
/// transaction: the mutation and the records it stages become visible
/// together or not at all.
#[derive(Debug, Clone)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<Vec<OutboxRecord>>>,
    clock: SharedClock,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            clock,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates a store outage (`false`) or its recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Runs `mutation` and stages the events it returns as one atomic step.
    ///
    /// If `mutation` fails nothing is staged. The outbox write lock is held
    /// for the duration, so `mutation` must not block.
    pub fn atomically<T, E, F>(&self, mutation: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<(T, Vec<NewOutboxEvent>), E>,
        E: From<OutboxError>,
    {
        self.ensure_available()?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let (value, events) = mutation()?;
        let now = self.clock.now();
        for event in events {
            tracing::debug!(
                aggregate_id = %event.aggregate_id,
                event_type = %event.event_type,
                "outbox event staged"
            );
            records.push(OutboxRecord::pending(event, now));
        }
        Ok(value)
    }

    /// Returns every record, oldest first.
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the records staged for `aggregate_id`, oldest first.
    pub fn records_for(&self, aggregate_id: &str) -> Vec<OutboxRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OutboxError::Unavailable(
                "in-memory outbox store is offline".to_string(),
            ))
        }
    }

    fn update_pending<T>(
        &self,
        id: OutboxId,
        update: impl FnOnce(&mut OutboxRecord) -> T,
    ) -> Result<Option<T>> {
        self.ensure_available()?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;

        if record.status != OutboxStatus::Pending {
            return Ok(None);
        }
        Ok(Some(update(record)))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, event: NewOutboxEvent) -> Result<OutboxRecord> {
        self.ensure_available()?;
        let record = OutboxRecord::pending(event, self.clock.now());
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        self.ensure_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        self.ensure_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: OutboxId, published_at: DateTime<Utc>) -> Result<bool> {
        let updated = self.update_pending(id, |record| {
            record.status = OutboxStatus::Published;
            record.published_at = Some(published_at);
        })?;
        Ok(updated.is_some())
    }

    async fn record_failure(
        &self,
        id: OutboxId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>> {
        self.update_pending(id, |record| {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
            if record.attempts >= max_attempts {
                record.status = OutboxStatus::Failed;
            }
            record.status
        })
    }

    async fn requeue_failed(&self, id: OutboxId) -> Result<bool> {
        self.ensure_available()?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.status == OutboxStatus::Failed => {
                record.status = OutboxStatus::Pending;
                record.attempts = 0;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(OutboxError::NotFound(id)),
        }
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.ensure_available()?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| {
            !(r.status == OutboxStatus::Published
                && r.published_at.unwrap_or(r.created_at) < cutoff)
        });
        Ok((before - records.len()) as u64)
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        self.ensure_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = StatusCounts::default();
        for record in records.iter() {
            match record.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Published => counts.published += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
