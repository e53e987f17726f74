//! Event Log Client.
//!
//! Producer and consumer-group access to a partitioned, append-only broker.
//! Sends resolve once the broker confirms the write; consumers acknowledge
//! each delivery explicitly, and anything left unacknowledged is redelivered.
//!
//! Implementations:
//! - [`InMemoryEventLog`] for tests and single-process development
//! - `KafkaEventLog` (feature `kafka`) backed by rdkafka

pub mod error;
pub mod log;
pub mod memory;
pub mod message;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use error::{EventLogError, Result};
pub use log::{EventConsumer, EventLog, EventProducer};
pub use memory::{InMemoryConsumer, InMemoryEventLog};
pub use message::{Delivery, DeliveryReceipt, OutboundMessage};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConsumer, KafkaEventLog};
