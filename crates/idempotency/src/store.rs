use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{IdempotencyRecord, Result, StoredResponse};

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The candidate record was stored; the caller owns the key.
    Claimed,
    /// A live record already holds the key.
    Existing(IdempotencyRecord),
}

/// Storage for the idempotency ledger.
///
/// Callers pass `now` explicitly so expiry decisions follow one clock.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Stores `candidate` if its key is absent or the existing record is
    /// reclaimable at `now`, as one atomic step. Concurrent claims for the
    /// same key have exactly one winner.
    async fn claim(&self, candidate: IdempotencyRecord, now: DateTime<Utc>)
    -> Result<ClaimOutcome>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// PROCESSING → COMPLETED. Returns false unless the key is PROCESSING
    /// under `claim_id`.
    async fn complete(
        &self,
        key: &str,
        claim_id: Uuid,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// PROCESSING → FAILED. Returns false unless the key is PROCESSING under
    /// `claim_id`.
    async fn fail(
        &self,
        key: &str,
        claim_id: Uuid,
        error: &str,
        response: Option<StoredResponse>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Flags COMPLETED and FAILED records past `expires_at` as EXPIRED.
    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Deletes EXPIRED records last updated before `cutoff`.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Fails PROCESSING records last updated before `started_before`.
    async fn fail_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}

#[async_trait]
impl<T: IdempotencyStore + ?Sized> IdempotencyStore for std::sync::Arc<T> {
    async fn claim(
        &self,
        candidate: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        (**self).claim(candidate, now).await
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        (**self).get(key).await
    }

    async fn complete(
        &self,
        key: &str,
        claim_id: Uuid,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).complete(key, claim_id, response, now).await
    }

    async fn fail(
        &self,
        key: &str,
        claim_id: Uuid,
        error: &str,
        response: Option<StoredResponse>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).fail(key, claim_id, error, response, now).await
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).mark_expired(now).await
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(cutoff).await
    }

    async fn fail_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        (**self).fail_stuck(started_before, reason, now).await
    }
}
