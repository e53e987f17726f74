//! Transaction lifecycle operations.

use common::{AccountId, SharedClock, SystemClock, TransactionReference};
use coordination::{CoordinationStore, DistributedLock, LockOptions, LockPolicy};
use outbox::NewOutboxEvent;

use crate::events::{
    AGGREGATE_TYPE, FRAUD_CHECK_REQUESTED, FraudCheckRequested, TRANSACTION_INITIATED,
    TRANSACTION_STATUS_CHANGED, TransactionInitiated, TransactionStatusChanged, TransactionTopics,
};
use crate::{
    FraudGate, Result, RiskContext, StatusChange, Transaction, TransactionError,
    TransactionRepository, TransactionStatus,
};

/// Request to create a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateTransaction {
    /// Client-chosen reference; generated when absent.
    pub reference: Option<TransactionReference>,
    pub account_id: AccountId,
    pub amount: i64,
    pub currency: String,
}

/// Lock policies guarding transaction mutations.
#[derive(Debug, Clone)]
pub struct TransactionLocks {
    /// Serializes work on one account (`account:{id}`).
    pub account: LockPolicy<AccountId>,
    /// Serializes work on one transaction (`transaction:{reference}`).
    pub transaction: LockPolicy<TransactionReference>,
}

impl TransactionLocks {
    pub fn new(options: LockOptions) -> Self {
        Self {
            account: LockPolicy::new(|id: &AccountId| format!("account:{id}"), options),
            transaction: LockPolicy::new(
                |reference: &TransactionReference| format!("transaction:{reference}"),
                options,
            ),
        }
    }
}

impl Default for TransactionLocks {
    fn default() -> Self {
        Self::new(LockOptions::default())
    }
}

/// Drives the transaction state machine.
///
/// Every mutation runs under a distributed lock and commits the aggregate
/// together with the outbox events describing it.
pub struct TransactionService<R, C> {
    repository: R,
    lock: DistributedLock<C>,
    locks: TransactionLocks,
    topics: TransactionTopics,
    clock: SharedClock,
}

impl<R, C> TransactionService<R, C>
where
    R: TransactionRepository,
    C: CoordinationStore,
{
    pub fn new(repository: R, lock: DistributedLock<C>) -> Self {
        Self {
            repository,
            lock,
            locks: TransactionLocks::default(),
            topics: TransactionTopics::default(),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_locks(mut self, locks: TransactionLocks) -> Self {
        self.locks = locks;
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

    pub fn topics(&self) -> &TransactionTopics {
        &self.topics
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Builds a Fraud-Gate sharing this service's repository, lock and topics.
    pub fn fraud_gate(&self) -> FraudGate<R, C>
    where
        R: Clone,
        C: Clone,
    {
        FraudGate::new(self.repository.clone(), self.lock.clone())
            .with_lock_policy(self.locks.transaction.clone())
            .with_topics(self.topics.clone())
            .with_clock(self.clock.clone())
    }

    /// Returns the transaction with `reference`.
    pub async fn get(&self, reference: &TransactionReference) -> Result<Transaction> {
        self.repository
            .get(reference)
            .await?
            .ok_or_else(|| TransactionError::NotFound(reference.clone()))
    }

    /// Creates a transaction in INITIATED and stages `transaction.initiated`.
    #[tracing::instrument(skip(self, command), fields(account_id = %command.account_id))]
    pub async fn initiate(&self, command: InitiateTransaction) -> Result<Transaction> {
        let account_id = command.account_id.clone();
        self.locks
            .account
            .run(&self.lock, &account_id, move || self.initiate_locked(command))
            .await
    }

    async fn initiate_locked(&self, command: InitiateTransaction) -> Result<Transaction> {
        let reference = command
            .reference
            .unwrap_or_else(TransactionReference::generate);
        if self.repository.get(&reference).await?.is_some() {
            return Err(TransactionError::AlreadyExists(reference));
        }

        let mut transaction = Transaction::initiate(
            reference,
            command.account_id,
            command.amount,
            &command.currency,
            self.clock.now(),
        )?;
        transaction.version = 1;

        let event = NewOutboxEvent::json(
            AGGREGATE_TYPE,
            transaction.reference.as_str(),
            TRANSACTION_INITIATED,
            &self.topics.events,
            &TransactionInitiated {
                transaction_reference: transaction.reference.clone(),
                account_id: transaction.account_id.clone(),
                amount: transaction.amount,
                currency: transaction.currency.clone(),
                status: transaction.status,
            },
        )?;
        self.repository.save(&transaction, 0, vec![event]).await?;

        metrics::counter!("transactions_initiated_total").increment(1);
        tracing::info!(
            reference = %transaction.reference,
            amount = transaction.amount,
            currency = %transaction.currency,
            "transaction initiated"
        );
        Ok(transaction)
    }

    /// INITIATED → VALIDATING → FRAUD_CHECK_PENDING, staging a
    /// `fraud.check-requested` event in the same commit.
    #[tracing::instrument(skip(self, risk_context))]
    pub async fn submit_for_fraud_check(
        &self,
        reference: &TransactionReference,
        risk_context: RiskContext,
    ) -> Result<Transaction> {
        self.locks
            .transaction
            .run(&self.lock, reference, move || {
                self.submit_locked(reference, risk_context)
            })
            .await
    }

    async fn submit_locked(
        &self,
        reference: &TransactionReference,
        risk_context: RiskContext,
    ) -> Result<Transaction> {
        let mut transaction = self.get(reference).await?;
        let expected = transaction.version;
        let now = self.clock.now();

        let changes = vec![
            transaction.transition(TransactionStatus::Validating, "validation started", now)?,
            transaction.transition(
                TransactionStatus::FraudCheckPending,
                "fraud check requested",
                now,
            )?,
        ];
        transaction.version = expected + 1;

        let mut events = status_changed_events(&transaction, &changes, &self.topics)?;
        events.push(NewOutboxEvent::json(
            AGGREGATE_TYPE,
            transaction.reference.as_str(),
            FRAUD_CHECK_REQUESTED,
            &self.topics.fraud_requests,
            &FraudCheckRequested {
                transaction_reference: transaction.reference.clone(),
                account_id: transaction.account_id.clone(),
                amount: transaction.amount,
                currency: transaction.currency.clone(),
                risk_context,
            },
        )?);
        self.repository.save(&transaction, expected, events).await?;

        tracing::info!(reference = %transaction.reference, "fraud check requested");
        Ok(transaction)
    }

    /// Applies a lifecycle transition outside the fraud-check flow.
    #[tracing::instrument(skip(self, reason))]
    pub async fn advance(
        &self,
        reference: &TransactionReference,
        to: TransactionStatus,
        reason: String,
    ) -> Result<Transaction> {
        self.locks
            .transaction
            .run(&self.lock, reference, move || {
                self.advance_locked(reference, to, reason)
            })
            .await
    }

    async fn advance_locked(
        &self,
        reference: &TransactionReference,
        to: TransactionStatus,
        reason: String,
    ) -> Result<Transaction> {
        let mut transaction = self.get(reference).await?;
        if to.is_fraud_controlled() {
            return Err(TransactionError::InvalidTransition {
                reference: reference.clone(),
                from: transaction.status,
                to,
            });
        }

        let expected = transaction.version;
        let change = transaction.transition(to, reason, self.clock.now())?;
        transaction.version = expected + 1;

        let events = status_changed_events(&transaction, std::slice::from_ref(&change), &self.topics)?;
        self.repository.save(&transaction, expected, events).await?;

        tracing::info!(
            reference = %transaction.reference,
            from = %change.from,
            to = %change.to,
            "transaction advanced"
        );
        Ok(transaction)
    }
}

pub(crate) fn status_changed_events(
    transaction: &Transaction,
    changes: &[StatusChange],
    topics: &TransactionTopics,
) -> Result<Vec<NewOutboxEvent>> {
    changes
        .iter()
        .map(|change| {
            NewOutboxEvent::json(
                AGGREGATE_TYPE,
                transaction.reference.as_str(),
                TRANSACTION_STATUS_CHANGED,
                &topics.events,
                &TransactionStatusChanged {
                    transaction_reference: transaction.reference.clone(),
                    from: change.from,
                    to: change.to,
                    reason: change.reason.clone(),
                },
            )
            .map_err(TransactionError::from)
        })
        .collect()
}
