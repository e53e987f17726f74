use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{SharedClock, SystemClock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{CoordinationStore, LockError};

/// Timing parameters for one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long the lease lives in the store if never released.
    pub lease_ttl: Duration,
    /// How long `acquire` keeps retrying before giving up.
    pub wait_timeout: Duration,
    /// Pause between attempts while the key is held by someone else.
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl LockOptions {
    pub fn new(lease_ttl: Duration, wait_timeout: Duration) -> Self {
        Self {
            lease_ttl,
            wait_timeout,
            ..Self::default()
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Proof of holding a lock.
///
/// The owner token is the only thing that can release or extend the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    token: String,
    ttl: Duration,
    acquired_at: DateTime<Utc>,
}

impl LockLease {
    /// The logical key the lease was acquired for.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

/// Named lease lock over a [`CoordinationStore`].
///
/// Keys are stored as `{namespace}:{key}` with the owner token as value.
/// There is no reentrancy: a second acquire by the same process waits like any
/// other contender.
#[derive(Debug, Clone)]
pub struct DistributedLock<S> {
    store: S,
    namespace: String,
    clock: SharedClock,
}

impl<S: CoordinationStore> DistributedLock<S> {
    /// Creates a lock using the `lock` namespace.
    pub fn new(store: S) -> Self {
        Self::with_namespace(store, "lock")
    }

    pub fn with_namespace(store: S, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            clock: SystemClock::shared(),
        }
    }

    /// Stamps leases with `clock`. Pass the store's clock so acquisition
    /// times line up with its TTLs.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Makes a single acquisition attempt.
    ///
    /// Returns `None` if another owner currently holds `key`.
    pub async fn try_acquire(
        &self,
        key: &str,
        lease_ttl: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .set_if_absent(&self.storage_key(key), &token, lease_ttl)
            .await?;

        Ok(acquired.then(|| LockLease {
            key: key.to_string(),
            token,
            ttl: lease_ttl,
            acquired_at: self.clock.now(),
        }))
    }

    /// Acquires `key`, retrying until `options.wait_timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if the key stayed held for the whole wait
    /// - [`LockError::Unavailable`] if the store failed; no lease is held
    #[tracing::instrument(skip(self, options), fields(lease_ttl_ms = options.lease_ttl.as_millis() as u64))]
    pub async fn acquire(&self, key: &str, options: &LockOptions) -> Result<LockLease, LockError> {
        let started = Instant::now();
        let deadline = started + options.wait_timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(lease) = self.try_acquire(key, options.lease_ttl).await? {
                tracing::debug!(attempts, "lock acquired");
                return Ok(lease);
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("lock_acquire_timeouts_total").increment(1);
                tracing::warn!(attempts, "timed out waiting for lock");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: now - started,
                });
            }

            tokio::time::sleep(options.retry_interval.min(deadline - now)).await;
        }
    }

    /// Releases a lease held by this owner.
    ///
    /// # Errors
    ///
    /// [`LockError::NotOwner`] if the stored token no longer matches, which
    /// means the lease expired. Whoever holds the key now keeps it.
    #[tracing::instrument(skip(self, lease), fields(key = %lease.key))]
    pub async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        let deleted = self
            .store
            .delete_if_equals(&self.storage_key(&lease.key), &lease.token)
            .await?;

        if deleted {
            tracing::debug!("lock released");
            Ok(())
        } else {
            tracing::warn!("lock release rejected, lease no longer owned");
            Err(LockError::NotOwner {
                key: lease.key.clone(),
            })
        }
    }

    /// Resets the lease TTL to `ttl` from now.
    pub async fn extend(&self, lease: &mut LockLease, ttl: Duration) -> Result<(), LockError> {
        let extended = self
            .store
            .expire_if_equals(&self.storage_key(&lease.key), &lease.token, ttl)
            .await?;

        if extended {
            lease.ttl = ttl;
            Ok(())
        } else {
            Err(LockError::NotOwner {
                key: lease.key.clone(),
            })
        }
    }

    /// Returns true if any owner currently holds `key`.
    pub async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.store.get(&self.storage_key(key)).await?.is_some())
    }
}
