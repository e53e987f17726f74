use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    ClaimOutcome, IdempotencyError, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    Result, StoredResponse,
};

/// In-memory idempotency ledger for testing and single-process deployments.
#[derive(Debug, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates a store outage (`false`) or its recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of records in the ledger.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites a record directly, bypassing the state machine.
    pub fn insert_raw(&self, record: IdempotencyRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.key.clone(), record);
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, IdempotencyRecord>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(IdempotencyError::Unavailable(
                "in-memory idempotency store is offline".to_string(),
            ));
        }
        Ok(self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn finish(
        &self,
        key: &str,
        claim_id: Uuid,
        status: IdempotencyStatus,
        response: Option<StoredResponse>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.lock()?;
        match records.get_mut(key) {
            Some(record)
                if record.status == IdempotencyStatus::Processing && record.claim_id == claim_id =>
            {
                record.status = status;
                record.response = response;
                record.error = error.map(str::to_string);
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(
        &self,
        candidate: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut records = self.lock()?;
        if let Some(existing) = records.get(&candidate.key)
            && !existing.is_reclaimable(now)
        {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        records.insert(candidate.key.clone(), candidate);
        Ok(ClaimOutcome::Claimed)
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn complete(
        &self,
        key: &str,
        claim_id: Uuid,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.finish(key, claim_id, IdempotencyStatus::Completed, Some(response), None, now)
    }

    async fn fail(
        &self,
        key: &str,
        claim_id: Uuid,
        error: &str,
        response: Option<StoredResponse>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.finish(key, claim_id, IdempotencyStatus::Failed, response, Some(error), now)
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.lock()?;
        let mut flagged = 0;
        for record in records.values_mut() {
            if record.status.is_terminal() && record.expires_at <= now {
                record.status = IdempotencyStatus::Expired;
                record.updated_at = now;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| !(r.status == IdempotencyStatus::Expired && r.updated_at < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn fail_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut records = self.lock()?;
        let mut failed = 0;
        for record in records.values_mut() {
            if record.status == IdempotencyStatus::Processing && record.updated_at < started_before
            {
                record.status = IdempotencyStatus::Failed;
                record.error = Some(reason.to_string());
                record.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }
}
