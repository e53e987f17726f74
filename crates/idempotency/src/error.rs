use thiserror::Error;

/// Errors raised by the idempotency ledger.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The request did not carry an idempotency key.
    #[error("Idempotency key is required")]
    MissingKey,

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    /// Another attempt with the same key is still running.
    #[error("Request with idempotency key '{key}' is already in progress")]
    InProgress { key: String },

    /// The key was reused for a different request.
    #[error("Idempotency key '{key}' was already used for a different request")]
    FingerprintMismatch { key: String },

    /// The key already completed and replay is disabled.
    #[error("Request with idempotency key '{key}' was already processed")]
    AlreadyProcessed { key: String },

    /// The stored record is in an impossible state.
    #[error("Idempotency record '{key}' is corrupt: {reason}")]
    Integrity { key: String, reason: String },

    /// `complete` or `fail` came from an attempt that no longer owns the key:
    /// the record finished, was reaped as stuck, or was reclaimed since.
    #[error("Idempotency key '{key}' is no longer held by this attempt")]
    ClaimLost { key: String },

    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl IdempotencyError {
    /// Returns true if the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IdempotencyError::InProgress { .. }
                | IdempotencyError::Unavailable(_)
                | IdempotencyError::Database(_)
        )
    }
}

/// Result type for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
