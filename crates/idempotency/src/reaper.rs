use std::sync::Arc;
use std::time::Duration;

use common::{Schedule, SharedClock, SystemClock, TaskHandle, spawn_periodic};

use crate::{IdempotencyStore, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyReaperConfig {
    /// EXPIRED records are purged once they have been expired this long.
    pub purge_grace: Duration,
    /// PROCESSING records older than this are force-failed.
    pub stuck_threshold: Duration,
    pub expired_interval: Duration,
    pub stuck_interval: Duration,
}

impl Default for IdempotencyReaperConfig {
    fn default() -> Self {
        Self {
            purge_grace: Duration::from_secs(7 * 24 * 60 * 60),
            stuck_threshold: Duration::from_secs(10 * 60),
            expired_interval: Duration::from_secs(60 * 60),
            stuck_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Outcome of [`IdempotencyReaper::cleanup_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiredCleanup {
    pub flagged: u64,
    pub purged: u64,
}

/// Expires old ledger entries and unwedges abandoned ones.
pub struct IdempotencyReaper<S> {
    store: S,
    config: IdempotencyReaperConfig,
    clock: SharedClock,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

impl<S: IdempotencyStore> IdempotencyReaper<S> {
    pub fn new(store: S, config: IdempotencyReaperConfig) -> Self {
        Self {
            store,
            config,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Flags finished records past their TTL as EXPIRED and purges those
    /// expired longer than the purge grace.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<ExpiredCleanup> {
        let now = self.clock.now();
        let flagged = self.store.mark_expired(now).await?;
        let purged = self
            .store
            .purge_expired(now - to_chrono(self.config.purge_grace))
            .await?;

        if flagged > 0 || purged > 0 {
            tracing::info!(flagged, purged, "idempotency records expired");
        }
        Ok(ExpiredCleanup { flagged, purged })
    }

    /// Force-fails PROCESSING records older than the stuck threshold so
    /// retries with the same key can run.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_stuck(&self) -> Result<u64> {
        let now = self.clock.now();
        let threshold = self.config.stuck_threshold;
        let reason = format!(
            "abandoned: still processing after {}s",
            threshold.as_secs()
        );

        let failed = self
            .store
            .fail_stuck(now - to_chrono(threshold), &reason, now)
            .await?;

        if failed > 0 {
            tracing::warn!(failed, "force-failed stuck idempotency records");
        }
        Ok(failed)
    }
}

impl<S: IdempotencyStore + 'static> IdempotencyReaper<S> {
    /// Starts the expiry and stuck-record tasks on their own schedules.
    pub fn spawn(self) -> [TaskHandle; 2] {
        let reaper = Arc::new(self);

        let expired = {
            let reaper = Arc::clone(&reaper);
            spawn_periodic(
                "idempotency-expiry",
                Schedule::every(reaper.config.expired_interval)
                    .with_initial_delay(reaper.config.expired_interval),
                move || {
                    let reaper = Arc::clone(&reaper);
                    async move { reaper.cleanup_expired().await.map(|_| ()) }
                },
            )
        };

        let stuck = spawn_periodic(
            "idempotency-stuck",
            Schedule::every(reaper.config.stuck_interval)
                .with_initial_delay(reaper.config.stuck_interval),
            move || {
                let reaper = Arc::clone(&reaper);
                async move { reaper.cleanup_stuck().await.map(|_| ()) }
            },
        );

        [expired, stuck]
    }
}
