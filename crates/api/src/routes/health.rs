//! Liveness, outbox backlog and Prometheus endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::OutboxStore;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OutboxBacklog {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when an outbox backlog exceeds its threshold.
    pub status: &'static str,
    pub outbox: OutboxBacklog,
}

/// GET /health: reports the outbox backlog.
pub async fn check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let counts = state.outbox.count_by_status().await?;
    let degraded = counts.pending > state.health.pending_threshold
        || counts.failed > state.health.failed_threshold;

    Ok(Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        outbox: OutboxBacklog {
            pending: counts.pending,
            published: counts.published,
            failed: counts.failed,
        },
    }))
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
