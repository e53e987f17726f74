use async_trait::async_trait;

use crate::{Delivery, DeliveryReceipt, OutboundMessage, Result};

/// Sending side of the event log.
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Appends a message and resolves once the broker confirms it.
    ///
    /// The future is the completion callback: callers that must not block on
    /// the network simply do not await it inside their own transaction.
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt>;
}

/// Receiving side of one consumer-group member.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Waits for the next delivery assigned to this member.
    async fn next(&self) -> Result<Delivery>;

    /// Marks a delivery as processed. Must only be called after the local
    /// effects of the delivery have been committed.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Returns a delivery to the broker for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;
}

/// A broker that supports both sending and consumer groups.
#[async_trait]
pub trait EventLog: EventProducer {
    /// Consumer type handed out by [`EventLog::subscribe`].
    type Consumer: EventConsumer + 'static;

    /// Joins `group` on `topic`. Members of the same group share the topic's
    /// deliveries; each delivery goes to one member at a time.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Self::Consumer>;
}
