//! Idempotency ledger for mutating requests.
//!
//! Every request carrying an [`IdempotencyKey`] goes through
//! [`IdempotencyGate::begin`]:
//!
//! - [`BeginOutcome::Novel`]: this caller holds an [`IdempotencyClaim`] and runs the handler
//! - [`BeginOutcome::InProgress`]: another attempt is running; reject
//! - [`BeginOutcome::Cached`]: replay the stored response verbatim
//!
//! [`execute_idempotent`] wraps a handler in that protocol, and
//! [`IdempotencyReaper`] expires old records and unwedges stuck ones.

pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod key;
pub mod memory;
pub mod middleware;
pub mod postgres;
pub mod reaper;
pub mod record;
pub mod store;

pub use error::{IdempotencyError, Result};
pub use fingerprint::RequestFingerprint;
pub use gate::{BeginOutcome, IdempotencyClaim, IdempotencyConfig, IdempotencyGate, IdempotentRequest};
pub use key::IdempotencyKey;
pub use memory::InMemoryIdempotencyStore;
pub use middleware::{IdempotentResponse, execute_idempotent};
pub use postgres::PostgresIdempotencyStore;
pub use reaper::{ExpiredCleanup, IdempotencyReaper, IdempotencyReaperConfig};
pub use record::{IdempotencyRecord, IdempotencyStatus, StoredResponse};
pub use store::{ClaimOutcome, IdempotencyStore};
