//! Cross-instance mutual exclusion.
//!
//! - [`CoordinationStore`]: atomic set-if-absent with TTL and owner-checked
//!   delete over a shared key-value store
//! - [`DistributedLock`]: named lease acquire/release on top of the store
//! - [`LockPolicy`]: wraps a critical section in acquire/release, with the
//!   lock key derived from the request by a caller-supplied closure

pub mod error;
pub mod lock;
pub mod memory;
pub mod policy;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use error::{CoordinationError, LockError, Result};
pub use lock::{DistributedLock, LockLease, LockOptions};
pub use memory::InMemoryCoordinationStore;
pub use policy::LockPolicy;
pub use store::CoordinationStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;
