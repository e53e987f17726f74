use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::{CoordinationStore, DistributedLock, LockError, LockOptions};

type KeyBuilder<R> = Arc<dyn Fn(&R) -> String + Send + Sync>;

/// Runs critical sections under a lock whose key is derived from the request.
///
/// ```ignore
/// let policy = LockPolicy::new(
///     |req: &Transfer| format!("account:{}", req.account_id),
///     LockOptions::default(),
/// );
/// policy.run(&lock, &request, || async { debit(&request).await }).await?;
/// ```
pub struct LockPolicy<R: ?Sized> {
    key_builder: KeyBuilder<R>,
    options: LockOptions,
}

impl<R: ?Sized> Clone for LockPolicy<R> {
    fn clone(&self) -> Self {
        Self {
            key_builder: Arc::clone(&self.key_builder),
            options: self.options,
        }
    }
}

impl<R: ?Sized> fmt::Debug for LockPolicy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockPolicy")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<R: ?Sized> LockPolicy<R> {
    pub fn new<F>(key_builder: F, options: LockOptions) -> Self
    where
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        Self {
            key_builder: Arc::new(key_builder),
            options,
        }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Returns the lock key for `request`.
    pub fn key_for(&self, request: &R) -> String {
        (self.key_builder)(request)
    }

    /// Acquires the lock for `request`, runs `critical`, then releases.
    ///
    /// `critical` never runs unless the lease was confirmed by the store. A
    /// failed release is logged and the section's own result is returned; the
    /// lease TTL clears the key.
    pub async fn run<S, F, Fut, T, E>(
        &self,
        lock: &DistributedLock<S>,
        request: &R,
        critical: F,
    ) -> Result<T, E>
    where
        S: CoordinationStore,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let key = self.key_for(request);
        let lease = lock.acquire(&key, &self.options).await?;

        let outcome = critical().await;

        if let Err(e) = lock.release(&lease).await {
            tracing::warn!(key = %key, error = %e, "failed to release lock, lease will lapse at its ttl");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::InMemoryCoordinationStore;

    struct Debit {
        account: &'static str,
    }

    fn policy() -> LockPolicy<Debit> {
        LockPolicy::new(
            |req: &Debit| format!("account:{}", req.account),
            LockOptions::new(Duration::from_secs(30), Duration::from_millis(20))
                .with_retry_interval(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn key_builder_derives_lock_key() {
        assert_eq!(policy().key_for(&Debit { account: "7" }), "account:7");
    }

    #[tokio::test]
    async fn run_releases_after_critical_section() {
        let lock = DistributedLock::new(InMemoryCoordinationStore::new());
        let request = Debit { account: "7" };

        let value = policy()
            .run(&lock, &request, || async { Ok::<_, LockError>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(!lock.is_locked("account:7").await.unwrap());
    }

    #[tokio::test]
    async fn run_releases_when_critical_section_fails() {
        let lock = DistributedLock::new(InMemoryCoordinationStore::new());
        let request = Debit { account: "7" };

        let result: Result<(), LockError> = policy()
            .run(&lock, &request, || async {
                Err(LockError::Unavailable("downstream".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(!lock.is_locked("account:7").await.unwrap());
    }

    #[tokio::test]
    async fn critical_section_skipped_when_store_unavailable() {
        let store = InMemoryCoordinationStore::new();
        store.set_available(false);
        let lock = DistributedLock::new(store);
        let ran = AtomicBool::new(false);
        let flag = &ran;

        let result: Result<(), LockError> = policy()
            .run(&lock, &Debit { account: "7" }, move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(LockError::Unavailable(_))));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
