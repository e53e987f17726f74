//! HTTP service wiring the transaction consistency substrate.
//!
//! Mutating endpoints require an `Idempotency-Key` header and replay the
//! stored response for a repeated key. Transaction changes commit together
//! with their outbox events; the publisher, reapers, health monitor and
//! fraud-result consumer run as background tasks started by the binary.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use coordination::{CoordinationStore, DistributedLock};
use idempotency::{IdempotencyGate, IdempotencyStore};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{HealthConfig, InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transactions::{
    InMemoryTransactionRepository, PostgresTransactionRepository, TransactionLocks,
    TransactionRepository, TransactionService,
};

use config::Config;

pub type SharedCoordinationStore = Arc<dyn CoordinationStore>;
pub type SharedIdempotencyStore = Arc<dyn IdempotencyStore>;
pub type SharedOutboxStore = Arc<dyn OutboxStore>;
pub type SharedTransactionRepository = Arc<dyn TransactionRepository>;
pub type TransactionManager =
    TransactionService<SharedTransactionRepository, SharedCoordinationStore>;

/// A transaction repository and the outbox its saves commit into.
///
/// The two always share a commit domain, so they are built together.
#[derive(Clone)]
pub struct TransactionStorage {
    pub repository: SharedTransactionRepository,
    pub outbox: SharedOutboxStore,
}

impl TransactionStorage {
    pub fn in_memory(outbox: InMemoryOutboxStore) -> Self {
        Self {
            repository: Arc::new(InMemoryTransactionRepository::new(outbox.clone())),
            outbox: Arc::new(outbox),
        }
    }

    /// Aggregate rows and outbox rows commit in one Postgres transaction.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            repository: Arc::new(PostgresTransactionRepository::new(pool.clone())),
            outbox: Arc::new(PostgresOutboxStore::new(pool)),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub transactions: TransactionManager,
    pub idempotency: IdempotencyGate<SharedIdempotencyStore>,
    pub outbox: SharedOutboxStore,
    pub health: HealthConfig,
}

impl AppState {
    pub fn new(
        config: &Config,
        coordination: SharedCoordinationStore,
        idempotency: SharedIdempotencyStore,
        storage: TransactionStorage,
    ) -> Self {
        let transactions =
            TransactionService::new(storage.repository, DistributedLock::new(coordination))
                .with_locks(TransactionLocks::new(config.lock_options()))
                .with_topics(config.topics.clone());

        Self {
            transactions,
            idempotency: IdempotencyGate::new(idempotency, config.idempotency_config()),
            outbox: storage.outbox,
            health: config.health_config(),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/transactions", post(routes::transactions::create))
        .route("/transactions/{reference}", get(routes::transactions::get))
        .route(
            "/transactions/{reference}/fraud-check",
            post(routes::transactions::submit_fraud_check),
        )
        .route(
            "/transactions/{reference}/status",
            post(routes::transactions::advance),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
