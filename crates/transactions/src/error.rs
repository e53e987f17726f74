use common::TransactionReference;
use coordination::LockError;
use event_log::EventLogError;
use outbox::OutboxError;
use thiserror::Error;

use crate::TransactionStatus;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction not found: {0}")]
    NotFound(TransactionReference),

    #[error("Transaction already exists: {0}")]
    AlreadyExists(TransactionReference),

    #[error("Invalid transition for {reference}: {from} -> {to}")]
    InvalidTransition {
        reference: TransactionReference,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Invalid amount: {0} (must be positive minor units)")]
    InvalidAmount(i64),

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("Concurrent modification of {reference}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        reference: TransactionReference,
        expected: u64,
        actual: u64,
    },

    #[error("Undecodable fraud result: {0}")]
    Decode(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TransactionError {
    /// Returns true if the same operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::ConcurrencyConflict { .. } | TransactionError::Database(_) => true,
            TransactionError::Lock(e) => e.is_retryable(),
            TransactionError::EventLog(e) => e.is_retryable(),
            TransactionError::Outbox(e) => {
                matches!(e, OutboxError::Unavailable(_) | OutboxError::Database(_))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
