//! Transaction state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a transaction.
///
/// Main path:
/// ```text
/// INITIATED ─► VALIDATING ─► FRAUD_CHECK_PENDING ─┬─► FRAUD_APPROVED ─► PENDING_AUTHORIZATION
///                                                 └─► FRAUD_REJECTED ─► FAILED
///
/// PENDING_AUTHORIZATION ─► AUTHORIZED ─► PROCESSING ─► CAPTURED ─► COMPLETED
/// ```
///
/// FAILED, EXPIRED and CANCELLED are side exits. After COMPLETED only the
/// compensations REVERSED, REFUNDED, PARTIALLY_REFUNDED and DISPUTED are
/// reachable; nothing ever moves backwards along the main path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Initiated,
    Validating,
    FraudCheckPending,
    FraudApproved,
    FraudRejected,
    PendingAuthorization,
    Authorized,
    Processing,
    Captured,
    Completed,
    Failed,
    Expired,
    Cancelled,
    Reversed,
    Refunded,
    PartiallyRefunded,
    Disputed,
}

impl TransactionStatus {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        match self {
            Initiated => matches!(next, Validating | Failed | Cancelled | Expired),
            Validating => matches!(next, FraudCheckPending | Failed | Cancelled),
            FraudCheckPending => matches!(
                next,
                FraudApproved | FraudRejected | Failed | Cancelled | Expired
            ),
            FraudApproved => matches!(next, PendingAuthorization | Cancelled),
            FraudRejected => matches!(next, Failed | Cancelled),
            PendingAuthorization => matches!(next, Authorized | Failed | Cancelled | Expired),
            Authorized => matches!(next, Processing | Cancelled | Expired),
            Processing => matches!(next, Captured | Failed),
            Captured => matches!(next, Completed | Failed),
            Completed => matches!(next, Reversed | Refunded | PartiallyRefunded | Disputed),
            PartiallyRefunded => matches!(next, PartiallyRefunded | Refunded | Disputed),
            Disputed => matches!(next, Reversed | Refunded),
            Failed | Expired | Cancelled | Reversed | Refunded => false,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed
                | TransactionStatus::Expired
                | TransactionStatus::Cancelled
                | TransactionStatus::Reversed
                | TransactionStatus::Refunded
        )
    }

    /// Returns true for the states only the fraud-check flow may enter.
    pub fn is_fraud_controlled(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Validating
                | TransactionStatus::FraudCheckPending
                | TransactionStatus::FraudApproved
                | TransactionStatus::FraudRejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "INITIATED",
            TransactionStatus::Validating => "VALIDATING",
            TransactionStatus::FraudCheckPending => "FRAUD_CHECK_PENDING",
            TransactionStatus::FraudApproved => "FRAUD_APPROVED",
            TransactionStatus::FraudRejected => "FRAUD_REJECTED",
            TransactionStatus::PendingAuthorization => "PENDING_AUTHORIZATION",
            TransactionStatus::Authorized => "AUTHORIZED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Captured => "CAPTURED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Expired => "EXPIRED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Reversed => "REVERSED",
            TransactionStatus::Refunded => "REFUNDED",
            TransactionStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            TransactionStatus::Disputed => "DISPUTED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fraud sub-state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudStatus {
    #[default]
    NotChecked,
    Pending,
    Approved,
    Rejected,
    /// Flagged for manual review; the transaction stays pending.
    Review,
}

impl FraudStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudStatus::NotChecked => "NOT_CHECKED",
            FraudStatus::Pending => "PENDING",
            FraudStatus::Approved => "APPROVED",
            FraudStatus::Rejected => "REJECTED",
            FraudStatus::Review => "REVIEW",
        }
    }
}

impl std::fmt::Display for FraudStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
