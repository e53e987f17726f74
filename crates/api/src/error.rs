//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coordination::LockError;
use idempotency::IdempotencyError;
use outbox::OutboxError;
use thiserror::Error;
use transactions::TransactionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Idempotency(err) => idempotency_status(err),
            ApiError::Transaction(err) => transaction_status(err),
            ApiError::Outbox(err) => outbox_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, status = status.as_u16(), "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn idempotency_status(err: &IdempotencyError) -> StatusCode {
    match err {
        IdempotencyError::MissingKey | IdempotencyError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        IdempotencyError::InProgress { .. } | IdempotencyError::AlreadyProcessed { .. } => {
            StatusCode::CONFLICT
        }
        IdempotencyError::FingerprintMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        IdempotencyError::Unavailable(_) | IdempotencyError::Database(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn transaction_status(err: &TransactionError) -> StatusCode {
    match err {
        TransactionError::NotFound(_) => StatusCode::NOT_FOUND,
        TransactionError::InvalidAmount(_) | TransactionError::InvalidCurrency(_) => {
            StatusCode::BAD_REQUEST
        }
        TransactionError::AlreadyExists(_)
        | TransactionError::InvalidTransition { .. }
        | TransactionError::ConcurrencyConflict { .. }
        | TransactionError::Lock(LockError::Timeout { .. }) => StatusCode::CONFLICT,
        TransactionError::Lock(LockError::Unavailable(_)) | TransactionError::Database(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TransactionError::Outbox(err) => outbox_status(err),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn outbox_status(err: &OutboxError) -> StatusCode {
    match err {
        OutboxError::Unavailable(_) | OutboxError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
