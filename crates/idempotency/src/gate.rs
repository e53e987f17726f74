use std::time::Duration;

use common::{SharedClock, SystemClock};
use uuid::Uuid;

use crate::{
    ClaimOutcome, IdempotencyError, IdempotencyKey, IdempotencyRecord, IdempotencyStatus,
    IdempotencyStore, RequestFingerprint, Result, StoredResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a record answers retries.
    pub ttl: Duration,
    /// Replay stored responses of finished requests. When disabled, a retry
    /// of a finished request is rejected instead.
    pub replay_enabled: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            replay_enabled: true,
        }
    }
}

/// A mutating request as seen by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentRequest {
    pub key: IdempotencyKey,
    pub user_id: String,
    pub endpoint: String,
    pub fingerprint: RequestFingerprint,
}

impl IdempotentRequest {
    pub fn new(
        key: IdempotencyKey,
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        body: &[u8],
    ) -> Self {
        let user_id = user_id.into();
        let endpoint = endpoint.into();
        let fingerprint = RequestFingerprint::compute(&user_id, &endpoint, body);
        Self {
            key,
            user_id,
            endpoint,
            fingerprint,
        }
    }
}

/// One attempt's ownership of a key.
///
/// `complete` and `fail` only take effect while the record still belongs to
/// this claim, so an attempt that was reaped as stuck cannot finish a record
/// a later attempt has since claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    key: IdempotencyKey,
    id: Uuid,
}

impl IdempotencyClaim {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// What the caller must do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The caller owns the key and must run the handler, then call
    /// `complete` or `fail` with the claim.
    Novel(IdempotencyClaim),
    /// Another attempt holds the key. Reject as a conflict.
    InProgress,
    /// Return this response unchanged without running the handler.
    Cached(StoredResponse),
}

impl BeginOutcome {
    /// Returns the claim of a novel request.
    pub fn into_claim(self) -> Option<IdempotencyClaim> {
        match self {
            BeginOutcome::Novel(claim) => Some(claim),
            _ => None,
        }
    }
}

/// Check/claim/complete/fail protocol over an [`IdempotencyStore`].
pub struct IdempotencyGate<S> {
    store: S,
    config: IdempotencyConfig,
    clock: SharedClock,
}

impl<S: IdempotencyStore> IdempotencyGate<S> {
    pub fn new(store: S, config: IdempotencyConfig) -> Self {
        Self {
            store,
            config,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Claims the key or reports what the existing record dictates.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::FingerprintMismatch`] if the key was used for a
    ///   different request
    /// - [`IdempotencyError::AlreadyProcessed`] if the request finished and
    ///   replay is disabled
    /// - [`IdempotencyError::Integrity`] if the stored record is corrupt
    #[tracing::instrument(skip(self, request), fields(key = %request.key, endpoint = %request.endpoint))]
    pub async fn begin(&self, request: &IdempotentRequest) -> Result<BeginOutcome> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let candidate = IdempotencyRecord::processing(
            &request.key,
            request.fingerprint.clone(),
            &request.user_id,
            &request.endpoint,
            now,
            now + ttl,
        );

        let claim = IdempotencyClaim {
            key: request.key.clone(),
            id: candidate.claim_id,
        };
        let existing = match self.store.claim(candidate, now).await? {
            ClaimOutcome::Claimed => {
                tracing::debug!(claim_id = %claim.id, "idempotency key claimed");
                return Ok(BeginOutcome::Novel(claim));
            }
            ClaimOutcome::Existing(existing) => existing,
        };

        if existing.fingerprint != request.fingerprint {
            tracing::warn!("idempotency key reused for a different request");
            return Err(IdempotencyError::FingerprintMismatch {
                key: existing.key,
            });
        }

        match (existing.status, existing.response) {
            (IdempotencyStatus::Processing, _) => {
                tracing::info!("request already in progress");
                Ok(BeginOutcome::InProgress)
            }
            (IdempotencyStatus::Completed | IdempotencyStatus::Failed, Some(response)) => {
                if !self.config.replay_enabled {
                    return Err(IdempotencyError::AlreadyProcessed { key: existing.key });
                }
                metrics::counter!("idempotency_replays_total").increment(1);
                tracing::info!(
                    status_code = response.status_code,
                    "replaying stored response"
                );
                Ok(BeginOutcome::Cached(response))
            }
            (status, _) => {
                tracing::error!(%status, "idempotency record in impossible state");
                Err(IdempotencyError::Integrity {
                    key: existing.key,
                    reason: format!("{status} record without a stored response"),
                })
            }
        }
    }

    /// Records the handler's response for replay.
    ///
    /// # Errors
    ///
    /// [`IdempotencyError::ClaimLost`] if `claim` no longer owns the key.
    #[tracing::instrument(skip(self, body), fields(key = %claim.key, claim_id = %claim.id))]
    pub async fn complete(
        &self,
        claim: &IdempotencyClaim,
        status_code: u16,
        body: Vec<u8>,
    ) -> Result<()> {
        let response = StoredResponse::new(status_code, body);
        if self
            .store
            .complete(claim.key.as_str(), claim.id, response, self.clock.now())
            .await?
        {
            Ok(())
        } else {
            tracing::warn!("attempt lost its idempotency claim before completing");
            Err(IdempotencyError::ClaimLost {
                key: claim.key.as_str().to_string(),
            })
        }
    }

    /// Records a failed attempt.
    ///
    /// Without a `response` the key becomes claimable again, so the client's
    /// retry runs the handler. With one, the failure is replayed like a
    /// success.
    #[tracing::instrument(skip(self, response), fields(key = %claim.key, claim_id = %claim.id))]
    pub async fn fail(
        &self,
        claim: &IdempotencyClaim,
        error: &str,
        response: Option<StoredResponse>,
    ) -> Result<()> {
        if self
            .store
            .fail(claim.key.as_str(), claim.id, error, response, self.clock.now())
            .await?
        {
            Ok(())
        } else {
            tracing::warn!("attempt lost its idempotency claim before failing");
            Err(IdempotencyError::ClaimLost {
                key: claim.key.as_str().to_string(),
            })
        }
    }
}
