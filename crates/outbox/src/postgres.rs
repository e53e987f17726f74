use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    NewOutboxEvent, OutboxError, OutboxId, OutboxRecord, OutboxStatus, Result, StatusCounts,
    store::OutboxStore,
};

const SELECT_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, topic, payload, status, attempts, last_error, created_at, published_at";

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
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

    /// Stages `event` on an open connection, normally inside the caller's
    /// transaction:
    ///
    /// ```ignore
    /// let mut tx = pool.begin().await?;
    /// update_transaction(&mut tx, &txn).await?;
    /// PostgresOutboxStore::append_in(&mut tx, event).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn append_in(conn: &mut PgConnection, event: NewOutboxEvent) -> Result<OutboxRecord> {
        let record = OutboxRecord::pending(event, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, topic, payload, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.aggregate_type)
        .bind(&record.aggregate_id)
        .bind(&record.event_type)
        .bind(&record.topic)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(conn)
        .await?;

        Ok(record)
    }

    fn row_to_record(row: PgRow) -> Result<OutboxRecord> {
        let status: String = row.try_get("status")?;
        let status = OutboxStatus::parse(&status)
            .ok_or_else(|| OutboxError::Corrupt(format!("unknown status '{status}'")))?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(OutboxRecord {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            status,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn append(&self, event: NewOutboxEvent) -> Result<OutboxRecord> {
        let mut conn = self.pool.acquire().await?;
        Self::append_in(&mut conn, event).await
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE status = 'PENDING' ORDER BY created_at ASC, id ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_published(&self, id: OutboxId, published_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PUBLISHED', published_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(published_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: OutboxId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'FAILED' ELSE status END
            WHERE id = $1 AND status = 'PENDING'
            RETURNING status
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        status
            .map(|s| {
                OutboxStatus::parse(&s)
                    .ok_or_else(|| OutboxError::Corrupt(format!("unknown status '{s}'")))
            })
            .transpose()
    }

    async fn requeue_failed(&self, id: OutboxId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING', attempts = 0
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'PUBLISHED' AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match OutboxStatus::parse(&status) {
                Some(OutboxStatus::Pending) => counts.pending = count,
                Some(OutboxStatus::Published) => counts.published = count,
                Some(OutboxStatus::Failed) => counts.failed = count,
                None => tracing::warn!(status = %status, "ignoring unknown outbox status"),
            }
        }
        Ok(counts)
    }
}
