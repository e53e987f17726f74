//! Shared building blocks for the transaction platform services.
//!
//! - Typed identifiers used across crate boundaries
//! - A [`Clock`] abstraction so retention and expiry logic can be tested
//! - A periodic task runner with an explicit start/stop lifecycle

pub mod clock;
pub mod task;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use task::{Schedule, TaskHandle, spawn_periodic};
pub use types::{AccountId, TransactionReference};
