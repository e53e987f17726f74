use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ClaimOutcome, IdempotencyError, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    RequestFingerprint, Result, StoredResponse,
};

const SELECT_COLUMNS: &str = "key, claim_id, request_fingerprint, status, response_status_code, response_body, error, user_id, endpoint, created_at, updated_at, expires_at";

/// Attempts before giving up on a key that keeps vanishing between the
/// conditional insert and the read of the existing row.
const CLAIM_ATTEMPTS: usize = 3;

/// PostgreSQL-backed idempotency ledger.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        let key: String = row.try_get("key")?;
        let status: String = row.try_get("status")?;
        let status =
            IdempotencyStatus::parse(&status).ok_or_else(|| IdempotencyError::Integrity {
                key: key.clone(),
                reason: format!("unknown status '{status}'"),
            })?;

        let code: Option<i32> = row.try_get("response_status_code")?;
        let body: Option<Vec<u8>> = row.try_get("response_body")?;
        let response = match (code, body) {
            (Some(code), Some(body)) => Some(StoredResponse {
                status_code: u16::try_from(code).map_err(|_| IdempotencyError::Integrity {
                    key: key.clone(),
                    reason: format!("status code {code} out of range"),
                })?,
                body,
            }),
            _ => None,
        };

        Ok(IdempotencyRecord {
            key,
            claim_id: row.try_get("claim_id")?,
            fingerprint: RequestFingerprint::from_hex(row.try_get::<String, _>("request_fingerprint")?),
            status,
            response,
            error: row.try_get("error")?,
            user_id: row.try_get("user_id")?,
            endpoint: row.try_get("endpoint")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    async fn finish(
        &self,
        key: &str,
        claim_id: Uuid,
        status: IdempotencyStatus,
        response: Option<StoredResponse>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (code, body) = match response {
            Some(r) => (Some(i32::from(r.status_code)), Some(r.body)),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = $3, response_status_code = $4, response_body = $5, error = $6, updated_at = $7
            WHERE key = $1 AND claim_id = $2 AND status = 'PROCESSING'
            "#,
        )
        .bind(key)
        .bind(claim_id)
        .bind(status.as_str())
        .bind(code)
        .bind(body)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn claim(
        &self,
        candidate: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        for _ in 0..CLAIM_ATTEMPTS {
            // The conflict branch only overwrites rows that are reclaimable,
            // so exactly one concurrent claimant sees a returned row.
            let claimed = sqlx::query(
                r#"
                INSERT INTO idempotency_records
                    (key, claim_id, request_fingerprint, status, user_id, endpoint, created_at, updated_at, expires_at)
                VALUES ($1, $8, $2, 'PROCESSING', $3, $4, $5, $5, $6)
                ON CONFLICT (key) DO UPDATE SET
                    claim_id = EXCLUDED.claim_id,
                    request_fingerprint = EXCLUDED.request_fingerprint,
                    status = 'PROCESSING',
                    response_status_code = NULL,
                    response_body = NULL,
                    error = NULL,
                    user_id = EXCLUDED.user_id,
                    endpoint = EXCLUDED.endpoint,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_records.status = 'EXPIRED'
                   OR idempotency_records.expires_at <= $7
                   OR (idempotency_records.status = 'FAILED' AND idempotency_records.response_body IS NULL)
                RETURNING key
                "#,
            )
            .bind(&candidate.key)
            .bind(candidate.fingerprint.as_str())
            .bind(&candidate.user_id)
            .bind(&candidate.endpoint)
            .bind(candidate.created_at)
            .bind(candidate.expires_at)
            .bind(now)
            .bind(candidate.claim_id)
            .fetch_optional(&self.pool)
            .await?;

            if claimed.is_some() {
                return Ok(ClaimOutcome::Claimed);
            }

            if let Some(existing) = self.get(&candidate.key).await? {
                return Ok(ClaimOutcome::Existing(existing));
            }
        }

        Err(IdempotencyError::Unavailable(format!(
            "could not claim idempotency key '{}' after {CLAIM_ATTEMPTS} attempts",
            candidate.key
        )))
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM idempotency_records WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn complete(
        &self,
        key: &str,
        claim_id: Uuid,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.finish(key, claim_id, IdempotencyStatus::Completed, Some(response), None, now)
            .await
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
            .await
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'EXPIRED', updated_at = $1
            WHERE status IN ('COMPLETED', 'FAILED') AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency_records WHERE status = 'EXPIRED' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fail_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'FAILED', error = $2, updated_at = $3
            WHERE status = 'PROCESSING' AND updated_at < $1
            "#,
        )
        .bind(started_before)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
