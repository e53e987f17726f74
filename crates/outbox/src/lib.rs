//! Transactional outbox.
//!
//! A business mutation stages its event as a PENDING [`OutboxRecord`] inside
//! its own local transaction. Background tasks then take over:
//!
//! - [`OutboxPublisher`] relays PENDING records to the event log
//! - [`OutboxReaper`] deletes PUBLISHED records past retention
//! - [`OutboxHealthMonitor`] raises alarms when the backlog grows
//!
//! A crash between commit and publish cannot lose the event; the next drain
//! picks it up.

pub mod error;
pub mod health;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod reaper;
pub mod record;
pub mod store;

pub use error::{OutboxError, Result};
pub use health::{
    Alarm, AlarmSink, HealthConfig, HealthReport, LoggingAlarmSink, OutboxHealthMonitor,
    RecordingAlarmSink,
};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use publisher::{DrainReport, OutboxPublisher, PublisherConfig};
pub use reaper::{OutboxReaper, ReaperConfig};
pub use record::{EventEnvelope, NewOutboxEvent, OutboxId, OutboxRecord, OutboxStatus};
pub use store::{OutboxStore, StatusCounts};
