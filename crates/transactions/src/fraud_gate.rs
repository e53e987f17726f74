//! Applies fraud-check results to transactions.

use common::{SharedClock, SystemClock, TransactionReference};
use coordination::{CoordinationStore, DistributedLock, LockOptions, LockPolicy};
use outbox::NewOutboxEvent;

use crate::events::{AGGREGATE_TYPE, FraudAssessed, TRANSACTION_FRAUD_ASSESSED, TransactionTopics};
use crate::service::status_changed_events;
use crate::{
    FraudApplication, FraudCheckResult, Result, TransactionError, TransactionRepository,
    TransactionStatus,
};

/// What [`FraudGate::on_result`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudOutcome {
    /// The decision was committed; `status` is the resulting transaction status.
    Applied { status: TransactionStatus },
    /// The same decision had already been committed.
    Duplicate,
    /// The transaction had already left FRAUD_CHECK_PENDING.
    Ignored { status: TransactionStatus },
}

/// Receiving end of the fraud-check hand-off.
pub struct FraudGate<R, C> {
    repository: R,
    lock: DistributedLock<C>,
    policy: LockPolicy<TransactionReference>,
    topics: TransactionTopics,
    clock: SharedClock,
}

impl<R, C> FraudGate<R, C>
where
    R: TransactionRepository,
    C: CoordinationStore,
{
    pub fn new(repository: R, lock: DistributedLock<C>) -> Self {
        Self {
            repository,
            lock,
            policy: LockPolicy::new(
                |reference: &TransactionReference| format!("transaction:{reference}"),
                LockOptions::default(),
            ),
            topics: TransactionTopics::default(),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy<TransactionReference>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_topics(mut self, topics: TransactionTopics) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Applies `result` to its transaction and commits the change together
    /// with its outbox events.
    ///
    /// Safe to call any number of times with the same result.
    #[tracing::instrument(
        skip(self, result),
        fields(reference = %result.transaction_reference, decision = %result.fraud_status)
    )]
    pub async fn on_result(&self, result: &FraudCheckResult) -> Result<FraudOutcome> {
        self.policy
            .run(&self.lock, &result.transaction_reference, move || {
                self.apply_locked(result)
            })
            .await
    }

    async fn apply_locked(&self, result: &FraudCheckResult) -> Result<FraudOutcome> {
        let reference = &result.transaction_reference;
        let mut transaction = self
            .repository
            .get(reference)
            .await?
            .ok_or_else(|| TransactionError::NotFound(reference.clone()))?;
        let expected = transaction.version;

        let changes = match transaction.apply_fraud_result(result, self.clock.now())? {
            FraudApplication::Applied(changes) => changes,
            FraudApplication::Duplicate => {
                tracing::debug!("fraud result already applied");
                return Ok(FraudOutcome::Duplicate);
            }
            FraudApplication::Ignored { status } => {
                tracing::warn!(%status, "fraud result for transaction no longer awaiting a decision");
                return Ok(FraudOutcome::Ignored { status });
            }
        };
        transaction.version = expected + 1;

        let mut events = status_changed_events(&transaction, &changes, &self.topics)?;
        events.push(NewOutboxEvent::json(
            AGGREGATE_TYPE,
            reference.as_str(),
            TRANSACTION_FRAUD_ASSESSED,
            &self.topics.events,
            &FraudAssessed {
                transaction_reference: reference.clone(),
                decision: result.fraud_status,
                fraud_status: transaction.fraud.status,
                fraud_score: result.fraud_score,
            },
        )?);
        self.repository.save(&transaction, expected, events).await?;

        metrics::counter!("fraud_results_applied_total", "decision" => result.fraud_status.as_str())
            .increment(1);
        tracing::info!(
            status = %transaction.status,
            score = result.fraud_score,
            "fraud result applied"
        );
        Ok(FraudOutcome::Applied {
            status: transaction.status,
        })
    }
}
