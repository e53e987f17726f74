//! Transaction endpoints guarded by the idempotency ledger.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common::{AccountId, TransactionReference};
use idempotency::{IdempotencyKey, IdempotentRequest, IdempotentResponse, StoredResponse, execute_idempotent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use transactions::{
    FraudStatus, InitiateTransaction, RiskContext, StatusChange, Transaction, TransactionStatus,
};

use crate::error::ApiError;
use crate::{AppState, TransactionManager};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

const ANONYMOUS_USER: &str = "anonymous";

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub reference: Option<String>,
    pub account_id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub status: TransactionStatus,
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub reference: String,
    pub account_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub fraud_status: FraudStatus,
    pub fraud_score: Option<f64>,
    pub version: u64,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(txn: &Transaction) -> Self {
        Self {
            reference: txn.reference.to_string(),
            account_id: txn.account_id.to_string(),
            amount: txn.amount,
            currency: txn.currency.clone(),
            status: txn.status,
            fraud_status: txn.fraud.status,
            fraud_score: txn.fraud.score,
            version: txn.version,
            history: txn.history.clone(),
            created_at: txn.created_at,
            updated_at: txn.updated_at,
        }
    }
}

// -- Handlers --

/// POST /transactions: create a transaction in INITIATED.
#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = idempotent_request(&headers, "POST /transactions".to_string(), &body)?;
    let payload: CreateTransactionRequest = parse_json(&body)?;
    let command = InitiateTransaction {
        reference: payload.reference.map(TransactionReference::from),
        account_id: AccountId::new(payload.account_id),
        amount: payload.amount,
        currency: payload.currency,
    };

    let service = &state.transactions;
    let outcome = execute_idempotent(&state.idempotency, &request, move || {
        initiate(service, command)
    })
    .await?;
    Ok(into_http(outcome))
}

async fn initiate(
    service: &TransactionManager,
    command: InitiateTransaction,
) -> Result<StoredResponse, ApiError> {
    let txn = service.initiate(command).await?;
    json_response(StatusCode::CREATED, &TransactionResponse::from(&txn))
}

/// POST /transactions/{reference}/fraud-check: hand the transaction to fraud detection.
#[tracing::instrument(skip(state, headers, body))]
pub async fn submit_fraud_check(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = idempotent_request(
        &headers,
        format!("POST /transactions/{reference}/fraud-check"),
        &body,
    )?;
    let risk_context: RiskContext = if body.is_empty() {
        RiskContext::default()
    } else {
        parse_json(&body)?
    };
    let reference = TransactionReference::from(reference);

    let service = &state.transactions;
    let outcome = execute_idempotent(&state.idempotency, &request, move || {
        submit(service, reference, risk_context)
    })
    .await?;
    Ok(into_http(outcome))
}

async fn submit(
    service: &TransactionManager,
    reference: TransactionReference,
    risk_context: RiskContext,
) -> Result<StoredResponse, ApiError> {
    let txn = service.submit_for_fraud_check(&reference, risk_context).await?;
    json_response(StatusCode::ACCEPTED, &TransactionResponse::from(&txn))
}

/// POST /transactions/{reference}/status: apply a lifecycle transition.
#[tracing::instrument(skip(state, headers, body))]
pub async fn advance(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = idempotent_request(
        &headers,
        format!("POST /transactions/{reference}/status"),
        &body,
    )?;
    let payload: AdvanceRequest = parse_json(&body)?;
    let reference = TransactionReference::from(reference);

    let service = &state.transactions;
    let outcome = execute_idempotent(&state.idempotency, &request, move || {
        apply_transition(service, reference, payload)
    })
    .await?;
    Ok(into_http(outcome))
}

async fn apply_transition(
    service: &TransactionManager,
    reference: TransactionReference,
    payload: AdvanceRequest,
) -> Result<StoredResponse, ApiError> {
    let reason = payload
        .reason
        .unwrap_or_else(|| format!("requested {}", payload.status));
    let txn = service.advance(&reference, payload.status, reason).await?;
    json_response(StatusCode::OK, &TransactionResponse::from(&txn))
}

/// GET /transactions/{reference}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let txn = state
        .transactions
        .get(&TransactionReference::from(reference))
        .await?;
    Ok(Json(TransactionResponse::from(&txn)))
}

// -- Helpers --

fn idempotent_request(
    headers: &HeaderMap,
    endpoint: String,
    body: &[u8],
) -> Result<IdempotentRequest, ApiError> {
    let raw_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Idempotency-Key must be visible ASCII".into()))
        })
        .transpose()?;
    let key = IdempotencyKey::from_header(raw_key)?;

    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(ANONYMOUS_USER);

    Ok(IdempotentRequest::new(key, user_id, endpoint, body))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<StoredResponse, ApiError> {
    let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StoredResponse::new(status.as_u16(), bytes))
}

fn into_http(outcome: IdempotentResponse) -> Response {
    let status = StatusCode::from_u16(outcome.response.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        outcome.response.body,
    )
        .into_response();

    if outcome.replayed {
        response
            .headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    response
}
