use std::fmt::Display;
use std::future::Future;

use crate::{
    BeginOutcome, IdempotencyError, IdempotencyGate, IdempotencyStore, IdempotentRequest,
    StoredResponse,
};

/// Response produced by [`execute_idempotent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentResponse {
    pub response: StoredResponse,
    /// True if the response was replayed from the ledger.
    pub replayed: bool,
}

/// Runs `handler` at most once per idempotency key.
///
/// - novel key: runs the handler and records its response for replay
/// - key in progress: returns [`IdempotencyError::InProgress`] without
///   running anything
/// - finished key: returns the stored response
///
/// A handler error marks the attempt FAILED without a response, so the
/// client can retry with the same key. Handlers that want a failure replayed
/// return it as an `Ok` response with an error status code.
#[tracing::instrument(skip_all, fields(key = %request.key, endpoint = %request.endpoint))]
pub async fn execute_idempotent<S, F, Fut, E>(
    gate: &IdempotencyGate<S>,
    request: &IdempotentRequest,
    handler: F,
) -> Result<IdempotentResponse, E>
where
    S: IdempotencyStore,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse, E>>,
    E: From<IdempotencyError> + Display,
{
    let claim = match gate.begin(request).await? {
        BeginOutcome::Cached(response) => {
            return Ok(IdempotentResponse {
                response,
                replayed: true,
            });
        }
        BeginOutcome::InProgress => {
            return Err(IdempotencyError::InProgress {
                key: request.key.as_str().to_string(),
            }
            .into());
        }
        BeginOutcome::Novel(claim) => claim,
    };

    match handler().await {
        Ok(response) => {
            if let Err(e) = gate
                .complete(&claim, response.status_code, response.body.clone())
                .await
            {
                // The effects are committed. Either the stuck reaper fails the
                // record later, or it already did and a successor's claim stands.
                tracing::error!(error = %e, "failed to record idempotent response");
            }
            Ok(IdempotentResponse {
                response,
                replayed: false,
            })
        }
        Err(e) => {
            if let Err(record_err) = gate.fail(&claim, &e.to_string(), None).await {
                tracing::error!(error = %record_err, "failed to record idempotent failure");
            }
            Err(e)
        }
    }
}
