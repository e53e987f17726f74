//! Event payloads staged in the outbox by the transaction flow.

use common::{AccountId, TransactionReference};
use serde::{Deserialize, Serialize};

use crate::{FraudDecision, FraudStatus, RiskContext, TransactionStatus};

/// Outbox aggregate type of every transaction event.
pub const AGGREGATE_TYPE: &str = "Transaction";

pub const TRANSACTION_INITIATED: &str = "transaction.initiated";
pub const TRANSACTION_STATUS_CHANGED: &str = "transaction.status-changed";
pub const TRANSACTION_FRAUD_ASSESSED: &str = "transaction.fraud-assessed";
pub const FRAUD_CHECK_REQUESTED: &str = "fraud.check-requested";

/// Topic names used by the transaction flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionTopics {
    /// Lifecycle events of the transaction aggregate.
    pub events: String,
    /// Fraud-check requests sent to the fraud-detection service.
    pub fraud_requests: String,
    /// Fraud-check results consumed by the Fraud-Gate.
    pub fraud_results: String,
}

impl Default for TransactionTopics {
    fn default() -> Self {
        Self {
            events: "transaction-events".to_string(),
            fraud_requests: "fraud-check-requests".to_string(),
            fraud_results: "fraud-check-results".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInitiated {
    pub transaction_reference: TransactionReference,
    pub account_id: AccountId,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusChanged {
    pub transaction_reference: TransactionReference,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudCheckRequested {
    pub transaction_reference: TransactionReference,
    pub account_id: AccountId,
    pub amount: i64,
    pub currency: String,
    pub risk_context: RiskContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessed {
    pub transaction_reference: TransactionReference,
    pub decision: FraudDecision,
    pub fraud_status: FraudStatus,
    pub fraud_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraud_check_request_uses_camel_case() {
        let event = FraudCheckRequested {
            transaction_reference: "TXN-1".into(),
            account_id: "acc-1".into(),
            amount: 2500,
            currency: "EUR".to_string(),
            risk_context: RiskContext::default(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["transactionReference"], "TXN-1");
        assert_eq!(json["accountId"], "acc-1");
        assert_eq!(json["amount"], 2500);
        assert!(json["riskContext"].is_object());
    }
}
