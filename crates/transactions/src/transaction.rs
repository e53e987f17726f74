//! Transaction aggregate.

use chrono::{DateTime, Utc};
use common::{AccountId, TransactionReference};
use serde::{Deserialize, Serialize};

use crate::{FraudCheckResult, FraudDecision, FraudStatus, Result, TransactionError, TransactionStatus};

/// One entry of the status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Fraud sub-state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessment {
    pub status: FraudStatus,
    pub score: Option<f64>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// What applying a fraud result did to the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum FraudApplication {
    /// The decision was recorded; contains the status changes it caused.
    Applied(Vec<StatusChange>),
    /// The same decision was already recorded.
    Duplicate,
    /// The transaction is no longer awaiting a decision.
    Ignored { status: TransactionStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub reference: TransactionReference,
    pub account_id: AccountId,
    /// Amount in minor units of `currency`.
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub fraud: FraudAssessment,
    /// Number of committed mutations; 0 until first saved.
    pub version: u64,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a transaction in INITIATED.
    pub fn initiate(
        reference: TransactionReference,
        account_id: AccountId,
        amount: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount(amount));
        }
        let currency = normalize_currency(currency)?;

        Ok(Self {
            reference,
            account_id,
            amount,
            currency,
            status: TransactionStatus::Initiated,
            fraud: FraudAssessment::default(),
            version: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves to `to` if the transition table allows it.
    pub fn transition(
        &mut self,
        to: TransactionStatus,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<StatusChange> {
        if !self.status.can_transition_to(to) {
            return Err(TransactionError::InvalidTransition {
                reference: self.reference.clone(),
                from: self.status,
                to,
            });
        }

        let change = StatusChange {
            from: self.status,
            to,
            reason: reason.into(),
            at: now,
        };
        self.status = to;
        self.updated_at = now;
        if to == TransactionStatus::FraudCheckPending {
            self.fraud.status = FraudStatus::Pending;
        }
        self.history.push(change.clone());
        Ok(change)
    }

    /// Records a fraud decision.
    ///
    /// Applying the same result twice leaves the aggregate as applying it
    /// once: the second call reports [`FraudApplication::Duplicate`].
    pub fn apply_fraud_result(
        &mut self,
        result: &FraudCheckResult,
        now: DateTime<Utc>,
    ) -> Result<FraudApplication> {
        let recorded = match result.fraud_status {
            FraudDecision::Approved => FraudStatus::Approved,
            FraudDecision::Rejected => FraudStatus::Rejected,
            FraudDecision::Review => FraudStatus::Review,
        };

        if self.fraud.status == recorded && self.fraud.score == Some(result.fraud_score) {
            return Ok(FraudApplication::Duplicate);
        }
        if self.status != TransactionStatus::FraudCheckPending {
            return Ok(FraudApplication::Ignored {
                status: self.status,
            });
        }

        let reason = format!("fraud check {} (score {})", result.fraud_status, result.fraud_score);
        let mut changes = Vec::new();
        match result.fraud_status {
            FraudDecision::Approved => {
                changes.push(self.transition(TransactionStatus::FraudApproved, reason, now)?);
                changes.push(self.transition(
                    TransactionStatus::PendingAuthorization,
                    "awaiting authorization",
                    now,
                )?);
            }
            FraudDecision::Rejected => {
                changes.push(self.transition(TransactionStatus::FraudRejected, reason, now)?);
            }
            FraudDecision::Review => {}
        }

        self.fraud = FraudAssessment {
            status: recorded,
            score: Some(result.fraud_score),
            decided_at: Some(now),
        };
        self.updated_at = now;
        Ok(FraudApplication::Applied(changes))
    }
}

fn normalize_currency(currency: &str) -> Result<String> {
    let code = currency.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(TransactionError::InvalidCurrency(currency.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Transaction {
        let now = Utc::now();
        let mut txn = Transaction::initiate("TXN-1".into(), "acc-1".into(), 1000, "usd", now).unwrap();
        txn.transition(TransactionStatus::Validating, "validated", now).unwrap();
        txn.transition(TransactionStatus::FraudCheckPending, "submitted", now).unwrap();
        txn
    }

    #[test]
    fn initiate_validates_input() {
        let now = Utc::now();
        let txn = Transaction::initiate("TXN-1".into(), "acc-1".into(), 1, "eur", now).unwrap();
        assert_eq!(txn.currency, "EUR");
        assert_eq!(txn.status, TransactionStatus::Initiated);
        assert_eq!(txn.version, 0);

        assert!(matches!(
            Transaction::initiate("TXN-2".into(), "acc-1".into(), 0, "EUR", now),
            Err(TransactionError::InvalidAmount(0))
        ));
        assert!(matches!(
            Transaction::initiate("TXN-3".into(), "acc-1".into(), 10, "EURO", now),
            Err(TransactionError::InvalidCurrency(_))
        ));
    }

    #[test]
    fn transition_records_history() {
        let txn = pending();
        assert_eq!(txn.status, TransactionStatus::FraudCheckPending);
        assert_eq!(txn.fraud.status, FraudStatus::Pending);
        assert_eq!(txn.history.len(), 2);
        assert_eq!(txn.history[1].from, TransactionStatus::Validating);
    }

    #[test]
    fn invalid_transition_leaves_state_untouched() {
        let mut txn = pending();
        let before = txn.clone();

        let result = txn.transition(TransactionStatus::Completed, "skip ahead", Utc::now());
        assert!(matches!(result, Err(TransactionError::InvalidTransition { .. })));
        assert_eq!(txn, before);
    }

    #[test]
    fn approval_moves_to_pending_authorization() {
        let mut txn = pending();
        let result = FraudCheckResult::new("TXN-1", 10.0, FraudDecision::Approved);

        let applied = txn.apply_fraud_result(&result, Utc::now()).unwrap();
        let FraudApplication::Applied(changes) = applied else {
            panic!("expected Applied");
        };
        assert_eq!(changes.len(), 2);
        assert_eq!(txn.status, TransactionStatus::PendingAuthorization);
        assert_eq!(txn.fraud.status, FraudStatus::Approved);
        assert_eq!(txn.fraud.score, Some(10.0));
    }

    #[test]
    fn applying_same_result_twice_equals_once() {
        let now = Utc::now();
        let result = FraudCheckResult::new("TXN-1", 88.0, FraudDecision::Rejected);

        let mut once = pending();
        once.apply_fraud_result(&result, now).unwrap();

        let mut twice = pending();
        twice.apply_fraud_result(&result, now).unwrap();
        let second = twice.apply_fraud_result(&result, now).unwrap();

        assert_eq!(second, FraudApplication::Duplicate);
        assert_eq!(once, twice);
        assert_eq!(twice.status, TransactionStatus::FraudRejected);
    }

    #[test]
    fn review_keeps_transaction_pending() {
        let mut txn = pending();
        let review = FraudCheckResult::new("TXN-1", 55.0, FraudDecision::Review);

        let applied = txn.apply_fraud_result(&review, Utc::now()).unwrap();
        assert_eq!(applied, FraudApplication::Applied(Vec::new()));
        assert_eq!(txn.status, TransactionStatus::FraudCheckPending);
        assert_eq!(txn.fraud.status, FraudStatus::Review);

        let approve = FraudCheckResult::new("TXN-1", 20.0, FraudDecision::Approved);
        txn.apply_fraud_result(&approve, Utc::now()).unwrap();
        assert_eq!(txn.status, TransactionStatus::PendingAuthorization);
    }

    #[test]
    fn conflicting_late_result_is_ignored() {
        let mut txn = pending();
        let now = Utc::now();
        txn.apply_fraud_result(&FraudCheckResult::new("TXN-1", 5.0, FraudDecision::Approved), now)
            .unwrap();

        let late = FraudCheckResult::new("TXN-1", 95.0, FraudDecision::Rejected);
        let applied = txn.apply_fraud_result(&late, now).unwrap();

        assert_eq!(
            applied,
            FraudApplication::Ignored {
                status: TransactionStatus::PendingAuthorization
            }
        );
        assert_eq!(txn.fraud.status, FraudStatus::Approved);
    }
}
