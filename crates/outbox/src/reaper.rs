use std::sync::Arc;
use std::time::Duration;

use common::{Schedule, SharedClock, SystemClock, TaskHandle, spawn_periodic};

use crate::{Result, store::OutboxStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// PUBLISHED records younger than this are kept.
    pub retention_days: u32,
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Deletes PUBLISHED records past their retention window.
///
/// PENDING and FAILED records are never touched.
pub struct OutboxReaper<S> {
    store: S,
    config: ReaperConfig,
    clock: SharedClock,
}

impl<S: OutboxStore> OutboxReaper<S> {
    pub fn new(store: S, config: ReaperConfig) -> Self {
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

    /// Deletes PUBLISHED records older than `retention_days`.
    /// Returns the number of deleted records.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self.store.delete_published_before(cutoff).await?;

        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "purged published outbox records");
        }
        Ok(deleted)
    }
}

impl<S: OutboxStore + 'static> OutboxReaper<S> {
    /// Starts cleaning up on the configured schedule.
    pub fn spawn(self) -> TaskHandle {
        let schedule = Schedule::every(self.config.interval).with_initial_delay(self.config.interval);
        let reaper = Arc::new(self);

        spawn_periodic("outbox-reaper", schedule, move || {
            let reaper = Arc::clone(&reaper);
            async move { reaper.cleanup(reaper.config.retention_days).await.map(|_| ()) }
        })
    }
}
