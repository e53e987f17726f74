use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{IdempotencyKey, RequestFingerprint};

/// Lifecycle of an idempotency record.
///
/// ```text
/// PROCESSING ──complete──> COMPLETED ──┐
///     │                                ├──expiry──> EXPIRED ──grace──> (purged)
///     └──fail / stuck────> FAILED ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
    Expired,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "PROCESSING",
            IdempotencyStatus::Completed => "COMPLETED",
            IdempotencyStatus::Failed => "FAILED",
            IdempotencyStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PROCESSING" => Some(IdempotencyStatus::Processing),
            "COMPLETED" => Some(IdempotencyStatus::Completed),
            "FAILED" => Some(IdempotencyStatus::Failed),
            "EXPIRED" => Some(IdempotencyStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IdempotencyStatus::Completed | IdempotencyStatus::Failed
        )
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response recorded for replay, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

impl StoredResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }
}

/// One row of the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    /// Identifies the attempt that claimed the key. Only that attempt may
    /// finish the record.
    pub claim_id: Uuid,
    pub fingerprint: RequestFingerprint,
    pub status: IdempotencyStatus,
    pub response: Option<StoredResponse>,
    pub error: Option<String>,
    pub user_id: String,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a PROCESSING record claimed at `now`.
    pub fn processing(
        key: &IdempotencyKey,
        fingerprint: RequestFingerprint,
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.as_str().to_string(),
            claim_id: Uuid::new_v4(),
            fingerprint,
            status: IdempotencyStatus::Processing,
            response: None,
            error: None,
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == IdempotencyStatus::Expired || self.expires_at <= now
    }

    /// Returns true if a new attempt may take over this key.
    ///
    /// Expired records are replaced, as are FAILED records that kept no
    /// response: nothing would be replayed, so the client's retry runs.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now)
            || (self.status == IdempotencyStatus::Failed && self.response.is_none())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(now: DateTime<Utc>) -> IdempotencyRecord {
        IdempotencyRecord::processing(
            &IdempotencyKey::parse("K1").unwrap(),
            RequestFingerprint::compute("u", "e", b""),
            "u",
            "e",
            now,
            now + Duration::hours(24),
        )
    }

    #[test]
    fn status_parses_its_own_representation() {
        for status in [
            IdempotencyStatus::Processing,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
            IdempotencyStatus::Expired,
        ] {
            assert_eq!(IdempotencyStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn every_claim_gets_its_own_id() {
        let now = Utc::now();
        assert_ne!(record(now).claim_id, record(now).claim_id);
    }

    #[test]
    fn processing_record_is_not_reclaimable() {
        let now = Utc::now();
        assert!(!record(now).is_reclaimable(now));
    }

    #[test]
    fn failed_without_response_is_reclaimable() {
        let now = Utc::now();
        let mut r = record(now);
        r.status = IdempotencyStatus::Failed;
        assert!(r.is_reclaimable(now));

        r.response = Some(StoredResponse::new(402, "declined"));
        assert!(!r.is_reclaimable(now));
    }

    #[test]
    fn expiry_makes_any_record_reclaimable() {
        let now = Utc::now();
        let mut r = record(now);
        r.status = IdempotencyStatus::Completed;
        r.response = Some(StoredResponse::new(200, "{}"));

        assert!(!r.is_reclaimable(now));
        assert!(r.is_reclaimable(now + Duration::hours(24)));
    }
}
