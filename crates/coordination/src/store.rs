use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Shared key-value store with atomic compare/set primitives.
///
/// Every operation is a single atomic step on the store; none of them may be
/// emulated with a separate read followed by a write.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Stores `value` under `key` with the given TTL only if `key` is absent.
    /// Returns true if the value was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deletes `key` only if its value equals `expected`.
    /// Returns true if the key was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Resets the TTL of `key` only if its value equals `expected`.
    /// Returns true if the TTL was updated.
    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;
}

#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for std::sync::Arc<T> {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        (**self).delete_if_equals(key, expected).await
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        (**self).expire_if_equals(key, expected, ttl).await
    }
}
