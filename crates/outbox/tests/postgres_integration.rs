//! PostgreSQL integration tests for the outbox store.
//!
//! These need Docker and are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p outbox --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use outbox::{NewOutboxEvent, OutboxStatus, OutboxStore, PostgresOutboxStore};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_outbox_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOutboxStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE outbox_events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOutboxStore::new(pool)
}

fn event(reference: &str) -> NewOutboxEvent {
    NewOutboxEvent::new(
        "Transaction",
        reference,
        "transaction.initiated",
        "transactions",
        br#"{"amount":100}"#.to_vec(),
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn append_and_fetch_pending_in_creation_order() {
    let store = get_test_store().await;
    store.append(event("TXN-1")).await.unwrap();
    store.append(event("TXN-2")).await.unwrap();

    let pending = store.fetch_pending(10).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|r| r.aggregate_id.as_str()).collect();
    assert_eq!(ids, ["TXN-1", "TXN-2"]);
    assert_eq!(pending[0].payload, br#"{"amount":100}"#.to_vec());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn append_in_rolled_back_transaction_leaves_nothing() {
    let store = get_test_store().await;

    let mut tx = store.pool().begin().await.unwrap();
    PostgresOutboxStore::append_in(&mut tx, event("TXN-1"))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(store.fetch_pending(10).await.unwrap().is_empty());

    let mut tx = store.pool().begin().await.unwrap();
    PostgresOutboxStore::append_in(&mut tx, event("TXN-2"))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.fetch_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn status_transitions_are_conditional() {
    let store = get_test_store().await;
    let published = store.append(event("TXN-1")).await.unwrap();
    let failing = store.append(event("TXN-2")).await.unwrap();

    assert!(store.mark_published(published.id, Utc::now()).await.unwrap());
    assert!(!store.mark_published(published.id, Utc::now()).await.unwrap());

    assert_eq!(
        store.record_failure(failing.id, "timeout", 2).await.unwrap(),
        Some(OutboxStatus::Pending)
    );
    assert_eq!(
        store.record_failure(failing.id, "timeout", 2).await.unwrap(),
        Some(OutboxStatus::Failed)
    );
    assert_eq!(
        store.record_failure(failing.id, "timeout", 2).await.unwrap(),
        None
    );

    let counts = store.count_by_status().await.unwrap();
    assert_eq!(counts.published, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.pending, 0);

    assert!(store.requeue_failed(failing.id).await.unwrap());
    let requeued = store.get(failing.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, OutboxStatus::Pending);
    assert_eq!(requeued.attempts, 0);
    assert_eq!(requeued.last_error.as_deref(), Some("timeout"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn delete_published_before_spares_other_statuses() {
    let store = get_test_store().await;
    let old = store.append(event("TXN-1")).await.unwrap();
    let pending = store.append(event("TXN-2")).await.unwrap();
    store
        .mark_published(old.id, Utc::now() - Duration::days(10))
        .await
        .unwrap();

    let deleted = store
        .delete_published_before(Utc::now() - Duration::days(7))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(store.get(old.id).await.unwrap().is_none());
    assert!(store.get(pending.id).await.unwrap().is_some());
}
