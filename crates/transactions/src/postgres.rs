use async_trait::async_trait;
use common::TransactionReference;
use outbox::{NewOutboxEvent, PostgresOutboxStore};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::{Result, Transaction, TransactionError, TransactionRepository};

/// PostgreSQL repository committing the aggregate row and its outbox rows in
/// one database transaction.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn get(&self, reference: &TransactionReference) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT state FROM transactions WHERE reference = $1")
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(transaction) = row.try_get::<Json<Transaction>, _>("state")?;
                Ok(Some(transaction))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: u64,
        events: Vec<NewOutboxEvent>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let written = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO transactions (reference, account_id, status, version, state, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (reference) DO NOTHING
                "#,
            )
            .bind(transaction.reference.as_str())
            .bind(transaction.account_id.as_str())
            .bind(transaction.status.as_str())
            .bind(to_db_version(transaction.version))
            .bind(Json(transaction))
            .bind(transaction.created_at)
            .bind(transaction.updated_at)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE transactions
                SET status = $2, version = $3, state = $4, updated_at = $5
                WHERE reference = $1 AND version = $6
                "#,
            )
            .bind(transaction.reference.as_str())
            .bind(transaction.status.as_str())
            .bind(to_db_version(transaction.version))
            .bind(Json(transaction))
            .bind(transaction.updated_at)
            .bind(to_db_version(expected_version))
            .execute(&mut *tx)
            .await?
        };

        if written.rows_affected() != 1 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM transactions WHERE reference = $1")
                    .bind(transaction.reference.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(TransactionError::ConcurrencyConflict {
                reference: transaction.reference.clone(),
                expected: expected_version,
                actual: actual.map_or(0, |v| u64::try_from(v).unwrap_or(0)),
            });
        }

        let staged = events.len();
        for event in events {
            PostgresOutboxStore::append_in(&mut *tx, event).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            reference = %transaction.reference,
            version = transaction.version,
            status = %transaction.status,
            staged,
            "transaction saved"
        );
        Ok(())
    }
}
