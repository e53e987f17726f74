//! Ledger behavior under concurrent and repeated requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;
use idempotency::{
    BeginOutcome, IdempotencyConfig, IdempotencyError, IdempotencyGate, IdempotencyKey,
    IdempotentRequest, InMemoryIdempotencyStore, StoredResponse, execute_idempotent,
};

fn request(key: &str) -> IdempotentRequest {
    IdempotentRequest::new(
        IdempotencyKey::parse(key).unwrap(),
        "user-1",
        "POST /transactions",
        br#"{"amount":1500,"currency":"EUR"}"#,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_begin_yields_exactly_one_novel() {
    let gate = Arc::new(IdempotencyGate::new(
        InMemoryIdempotencyStore::new(),
        IdempotencyConfig::default(),
    ));

    let attempts = (0..32).map(|_| {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.begin(&request("K-race")).await })
    });
    let outcomes: Vec<BeginOutcome> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let novel = outcomes
        .iter()
        .filter(|o| matches!(o, BeginOutcome::Novel(_)))
        .count();
    let in_progress = outcomes
        .iter()
        .filter(|o| **o == BeginOutcome::InProgress)
        .count();
    assert_eq!(novel, 1);
    assert_eq!(in_progress, 31);
}

#[tokio::test]
async fn conflicting_attempt_rejected_then_completed_response_replayed() {
    let gate = IdempotencyGate::new(InMemoryIdempotencyStore::new(), IdempotencyConfig::default());
    let executions = AtomicUsize::new(0);
    let executed = &executions;

    // First request begins and holds the key.
    let first = gate.begin(&request("K1")).await.unwrap().into_claim().unwrap();

    // A concurrent second request is rejected without running its handler.
    let second = execute_idempotent(&gate, &request("K1"), move || async move {
        executed.fetch_add(1, Ordering::SeqCst);
        Ok::<_, IdempotencyError>(StoredResponse::new(200, br#"{"id":99}"#.to_vec()))
    })
    .await;
    assert!(matches!(second, Err(IdempotencyError::InProgress { .. })));

    // The first request finishes.
    gate.complete(&first, 200, br#"{"id":42}"#.to_vec())
        .await
        .unwrap();

    // A later retry replays the original response without executing.
    let later = execute_idempotent(&gate, &request("K1"), move || async move {
        executed.fetch_add(1, Ordering::SeqCst);
        Ok::<_, IdempotencyError>(StoredResponse::new(200, br#"{"id":99}"#.to_vec()))
    })
    .await
    .unwrap();

    assert!(later.replayed);
    assert_eq!(later.response.status_code, 200);
    assert_eq!(later.response.body, br#"{"id":42}"#.to_vec());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn replay_is_stable_across_many_repeats() {
    let gate = IdempotencyGate::new(InMemoryIdempotencyStore::new(), IdempotencyConfig::default());
    let claim = gate.begin(&request("K2")).await.unwrap().into_claim().unwrap();
    gate.complete(&claim, 200, br#"{"id":7}"#.to_vec())
        .await
        .unwrap();

    for _ in 0..10 {
        assert_eq!(
            gate.begin(&request("K2")).await.unwrap(),
            BeginOutcome::Cached(StoredResponse::new(200, br#"{"id":7}"#.to_vec()))
        );
    }
}

#[tokio::test]
async fn distinct_keys_do_not_interfere() {
    let gate = IdempotencyGate::new(InMemoryIdempotencyStore::new(), IdempotencyConfig::default());

    assert!(matches!(gate.begin(&request("A")).await.unwrap(), BeginOutcome::Novel(_)));
    assert!(matches!(gate.begin(&request("B")).await.unwrap(), BeginOutcome::Novel(_)));
}
