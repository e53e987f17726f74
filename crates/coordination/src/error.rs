use std::time::Duration;

use thiserror::Error;

/// Errors raised by coordination store clients.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// The store could not be reached. Always transient.
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a command.
    #[error("Coordination store command failed: {0}")]
    Command(String),
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for CoordinationError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
        {
            CoordinationError::Unavailable(e.to_string())
        } else {
            CoordinationError::Command(e.to_string())
        }
    }
}

/// Result type for coordination store operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors raised by [`DistributedLock`](crate::DistributedLock).
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The lease was not obtained within the wait timeout.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout { key: String, waited: Duration },

    /// The stored token does not match: the lease expired and may now belong
    /// to another holder.
    #[error("Lock '{key}' is not held by this owner")]
    NotOwner { key: String },

    /// The coordination store failed; the critical section must not run.
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),
}

impl LockError {
    /// Returns true if the caller may retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout { .. } | LockError::Unavailable(_))
    }
}

impl From<CoordinationError> for LockError {
    fn from(e: CoordinationError) -> Self {
        LockError::Unavailable(e.to_string())
    }
}
