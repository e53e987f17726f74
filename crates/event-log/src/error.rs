use thiserror::Error;

/// Errors raised by event log clients.
#[derive(Debug, Clone, Error)]
pub enum EventLogError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker did not confirm a send.
    #[error("Send to topic '{topic}' failed: {reason}")]
    SendFailed { topic: String, reason: String },

    /// Joining a consumer group failed.
    #[error("Subscription to '{topic}' for group '{group}' failed: {reason}")]
    SubscriptionFailed {
        topic: String,
        group: String,
        reason: String,
    },

    /// Committing or rewinding a delivery failed.
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    /// Receiving from the broker failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl EventLogError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EventLogError::SubscriptionFailed { .. })
    }
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
