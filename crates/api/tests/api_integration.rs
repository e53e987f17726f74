//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, TransactionStorage};
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use coordination::{DistributedLock, InMemoryCoordinationStore};
use idempotency::{BeginOutcome, IdempotencyKey, IdempotentRequest, InMemoryIdempotencyStore};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryOutboxStore, OutboxStatus};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    state: Arc<AppState>,
    coordination: InMemoryCoordinationStore,
    ledger: InMemoryIdempotencyStore,
    outbox: InMemoryOutboxStore,
}

fn setup_with(config: Config) -> TestApp {
    let coordination = InMemoryCoordinationStore::new();
    let ledger = InMemoryIdempotencyStore::new();
    let outbox = InMemoryOutboxStore::new();
    let state = Arc::new(AppState::new(
        &config,
        Arc::new(coordination.clone()),
        Arc::new(ledger.clone()),
        TransactionStorage::in_memory(outbox.clone()),
    ));
    let router = api::create_app(state.clone(), get_metrics_handle());
    TestApp {
        router,
        state,
        coordination,
        ledger,
        outbox,
    }
}

fn setup() -> TestApp {
    setup_with(Config::default())
}

fn create_body(reference: &str) -> String {
    serde_json::json!({
        "reference": reference,
        "accountId": "acc-1",
        "amount": 4200,
        "currency": "usd"
    })
    .to_string()
}

fn post(uri: &str, key: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(body.into()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let replayed = response
        .headers()
        .get("idempotent-replayed")
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, replayed, body.to_vec())
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_health_reports_outbox_backlog() {
    let app = setup();

    let (status, _, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    let json = json(&body);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["outbox"]["pending"], 0);
}

#[tokio::test]
async fn test_health_degraded_past_threshold() {
    let app = setup_with(Config {
        outbox_pending_threshold: 0,
        ..Config::default()
    });
    send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    let (status, _, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "degraded");
    assert_eq!(json(&body)["outbox"]["pending"], 1);
}

#[tokio::test]
async fn test_create_requires_idempotency_key() {
    let app = setup();

    let (status, _, body) = send(&app, post("/transactions", None, create_body("TXN-1"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("required"));
    assert!(app.outbox.records().is_empty());
}

#[tokio::test]
async fn test_create_transaction() {
    let app = setup();

    let (status, replayed, body) =
        send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(replayed.is_none());
    let json = json(&body);
    assert_eq!(json["reference"], "TXN-1");
    assert_eq!(json["status"], "INITIATED");
    assert_eq!(json["currency"], "USD");

    let records = app.outbox.records_for("TXN-1");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_type, "transaction.initiated");
    assert_eq!(records[0].status, OutboxStatus::Pending);
}

#[tokio::test]
async fn test_repeated_key_replays_identical_response() {
    let app = setup();

    let (first_status, _, first_body) =
        send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    for _ in 0..3 {
        let (status, replayed, body) =
            send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;
        assert_eq!(status, first_status);
        assert_eq!(replayed.as_deref(), Some("true"));
        assert_eq!(body, first_body);
    }

    assert_eq!(app.outbox.records_for("TXN-1").len(), 1);
}

#[tokio::test]
async fn test_reused_key_with_different_body_is_rejected() {
    let app = setup();
    send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    let (status, _, _) = send(&app, post("/transactions", Some("k-1"), create_body("TXN-2"))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.outbox.records_for("TXN-2").is_empty());
}

#[tokio::test]
async fn test_key_in_progress_conflicts() {
    let app = setup();
    let body = create_body("TXN-1");
    let claimed = app
        .state
        .idempotency
        .begin(&IdempotentRequest::new(
            IdempotencyKey::parse("k-1").unwrap(),
            "anonymous",
            "POST /transactions",
            body.as_bytes(),
        ))
        .await
        .unwrap();
    assert!(matches!(claimed, BeginOutcome::Novel(_)));

    let (status, _, _) = send(&app, post("/transactions", Some("k-1"), body)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.outbox.records().is_empty());
}

#[tokio::test]
async fn test_ledger_outage_is_service_unavailable() {
    let app = setup();
    app.ledger.set_available(false);

    let (status, _, _) = send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_held_account_lock_conflicts() {
    let app = setup_with(Config {
        lock_wait_timeout: Duration::ZERO,
        ..Config::default()
    });
    let _held = DistributedLock::new(app.coordination.clone())
        .try_acquire("account:acc-1", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let (status, _, _) = send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.outbox.records().is_empty());
}

#[tokio::test]
async fn test_get_transaction() {
    let app = setup();
    send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    let (status, _, body) = send(&app, get("/transactions/TXN-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["amount"], 4200);

    let (status, _, _) = send(&app, get("/transactions/TXN-404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_fraud_check() {
    let app = setup();
    send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    let (status, _, body) = send(
        &app,
        post(
            "/transactions/TXN-1/fraud-check",
            Some("k-2"),
            r#"{"channel":"mobile"}"#,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json(&body)["status"], "FRAUD_CHECK_PENDING");
    assert_eq!(json(&body)["fraudStatus"], "PENDING");

    let records = app.outbox.records_for("TXN-1");
    let request = records
        .iter()
        .find(|r| r.event_type == "fraud.check-requested")
        .unwrap();
    assert_eq!(request.topic, "fraud-check-requests");
    let payload: serde_json::Value = serde_json::from_slice(&request.payload).unwrap();
    assert_eq!(payload["riskContext"]["channel"], "mobile");
}

#[tokio::test]
async fn test_invalid_transition_conflicts() {
    let app = setup();
    send(&app, post("/transactions", Some("k-1"), create_body("TXN-1"))).await;

    let (status, _, body) = send(
        &app,
        post(
            "/transactions/TXN-1/status",
            Some("k-2"),
            r#"{"status":"COMPLETED"}"#,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json(&body)["error"].as_str().unwrap().contains("INITIATED"));
}

#[tokio::test]
async fn test_failed_attempt_can_be_retried_with_same_key() {
    let app = setup();

    let (status, _, _) = send(
        &app,
        post("/transactions/TXN-9/status", Some("k-9"), r#"{"status":"CANCELLED"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, post("/transactions", Some("k-1"), create_body("TXN-9"))).await;
    let (status, replayed, body) = send(
        &app,
        post("/transactions/TXN-9/status", Some("k-9"), r#"{"status":"CANCELLED"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(replayed.is_none());
    assert_eq!(json(&body)["status"], "CANCELLED");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let (status, _, _) = send(&app, get("/metrics")).await;

    assert_eq!(status, StatusCode::OK);
}
