use thiserror::Error;

use crate::OutboxId;

/// Errors that can occur when staging or relaying outbox records.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The outbox record was not found.
    #[error("Outbox record not found: {0}")]
    NotFound(OutboxId),

    /// The record is not in a state that allows the operation.
    #[error("Outbox record {id} is {status}, expected {expected}")]
    InvalidStatus {
        id: OutboxId,
        status: String,
        expected: &'static str,
    },

    /// The local store could not be reached.
    #[error("Outbox store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("Corrupt outbox row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
