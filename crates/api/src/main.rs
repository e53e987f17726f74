//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, SharedCoordinationStore, SharedIdempotencyStore, TransactionStorage};
use coordination::{InMemoryCoordinationStore, RedisCoordinationStore};
use event_log::{EventLog, InMemoryEventLog};
use idempotency::{IdempotencyReaper, InMemoryIdempotencyStore, PostgresIdempotencyStore};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryOutboxStore, OutboxHealthMonitor, OutboxPublisher, OutboxReaper};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transactions::FraudResultConsumer;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!("outbox_published_total", "Outbox records relayed to the event log");
    metrics::describe_counter!("outbox_failed_total", "Outbox records that reached FAILED");
    metrics::describe_gauge!("outbox_pending", "PENDING outbox records at the last health check");
    metrics::describe_gauge!("outbox_failed", "FAILED outbox records at the last health check");
    metrics::describe_counter!("idempotency_replays_total", "Responses replayed from the idempotency ledger");
    metrics::describe_counter!("lock_acquire_timeouts_total", "Lock acquisitions that gave up waiting");
    metrics::describe_counter!("transactions_initiated_total", "Transactions created");
    metrics::describe_counter!("fraud_results_applied_total", "Fraud decisions committed to transactions");
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn coordination_store(config: &Config) -> SharedCoordinationStore {
    match &config.redis_url {
        Some(url) => {
            let store = RedisCoordinationStore::connect(url)
                .await
                .expect("failed to connect to Redis");
            tracing::info!("using Redis coordination store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set, locks are local to this process");
            Arc::new(InMemoryCoordinationStore::new())
        }
    }
}

/// Picks the idempotency ledger and the transaction storage. With
/// `DATABASE_URL` set both live in Postgres on one pool.
async fn durable_stores(config: &Config) -> (SharedIdempotencyStore, TransactionStorage) {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            let ledger = PostgresIdempotencyStore::new(pool.clone());
            ledger
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres idempotency ledger, transactions and outbox");
            (Arc::new(ledger), TransactionStorage::postgres(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, all durable state is in-memory");
            (
                Arc::new(InMemoryIdempotencyStore::new()),
                TransactionStorage::in_memory(InMemoryOutboxStore::new()),
            )
        }
    }
}

#[cfg(feature = "kafka")]
async fn run(config: Config, state: Arc<AppState>, metrics_handle: PrometheusHandle) {
    use event_log::{KafkaConfig, KafkaEventLog};

    match config.kafka_brokers.clone() {
        Some(brokers) => {
            let log = KafkaEventLog::new(KafkaConfig::new(brokers))
                .expect("failed to create Kafka client");
            serve(config, state, metrics_handle, log).await;
        }
        None => {
            tracing::warn!("KAFKA_BROKERS not set, using the in-memory event log");
            serve(config, state, metrics_handle, InMemoryEventLog::new()).await;
        }
    }
}

#[cfg(not(feature = "kafka"))]
async fn run(config: Config, state: Arc<AppState>, metrics_handle: PrometheusHandle) {
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS ignored: built without the `kafka` feature");
    }
    serve(config, state, metrics_handle, InMemoryEventLog::new()).await;
}

/// Starts the background tasks, serves HTTP until a shutdown signal, then
/// stops everything in reverse order.
async fn serve<L>(config: Config, state: Arc<AppState>, metrics_handle: PrometheusHandle, log: L)
where
    L: EventLog + Clone + 'static,
{
    let consumer = FraudResultConsumer::new(
        log.clone(),
        state.transactions.fraud_gate(),
        config.consumer_config(),
    )
    .start()
    .await
    .expect("failed to start fraud result consumer");

    let publisher =
        OutboxPublisher::new(state.outbox.clone(), log, config.publisher_config()).spawn();
    let outbox_reaper = OutboxReaper::new(state.outbox.clone(), config.reaper_config()).spawn();
    let health_monitor =
        OutboxHealthMonitor::new(state.outbox.clone(), config.health_config()).spawn();
    let [expired_reaper, stuck_reaper] = IdempotencyReaper::new(
        state.idempotency.store().clone(),
        config.idempotency_reaper_config(),
    )
    .spawn();

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    consumer.stop().await;
    for task in [
        publisher,
        health_monitor,
        outbox_reaper,
        expired_reaper,
        stuck_reaper,
    ] {
        task.stop().await;
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Connect the stores and build application state
    let coordination = coordination_store(&config).await;
    let (idempotency, storage) = durable_stores(&config).await;
    let state = Arc::new(AppState::new(&config, coordination, idempotency, storage));

    // 4. Start background work and serve
    run(config, state, metrics_handle).await;
}
