//! Backlog alarms for the outbox.
//!
//! The monitor only reports. It never retries or repairs records.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::{Schedule, TaskHandle, spawn_periodic};

use crate::{Result, StatusCounts, store::OutboxStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// An alarm fires when more than this many records are PENDING.
    pub pending_threshold: u64,
    /// An alarm fires when more than this many records are FAILED.
    pub failed_threshold: u64,
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            pending_threshold: 1000,
            failed_threshold: 100,
            interval: Duration::from_secs(60),
        }
    }
}

/// A threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    PendingBacklog { count: u64, threshold: u64 },
    FailedBacklog { count: u64, threshold: u64 },
}

impl std::fmt::Display for Alarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alarm::PendingBacklog { count, threshold } => {
                write!(f, "{count} outbox records PENDING (threshold {threshold})")
            }
            Alarm::FailedBacklog { count, threshold } => {
                write!(f, "{count} outbox records FAILED (threshold {threshold})")
            }
        }
    }
}

/// Destination for raised alarms.
pub trait AlarmSink: Send + Sync {
    fn raise(&self, alarm: &Alarm);
}

/// Reports alarms as `error`-level log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlarmSink;

impl AlarmSink for LoggingAlarmSink {
    fn raise(&self, alarm: &Alarm) {
        tracing::error!(alarm = %alarm, "outbox health alarm");
    }
}

/// Keeps every raised alarm in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlarmSink {
    alarms: Arc<Mutex<Vec<Alarm>>>,
}

impl RecordingAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AlarmSink for RecordingAlarmSink {
    fn raise(&self, alarm: &Alarm) {
        self.alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*alarm);
    }
}

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub counts: StatusCounts,
    pub alarms: Vec<Alarm>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.alarms.is_empty()
    }
}

/// Counts PENDING and FAILED records and raises alarms past the thresholds.
pub struct OutboxHealthMonitor<S> {
    store: S,
    config: HealthConfig,
    sink: Arc<dyn AlarmSink>,
}

impl<S: OutboxStore> OutboxHealthMonitor<S> {
    /// Creates a monitor that logs its alarms.
    pub fn new(store: S, config: HealthConfig) -> Self {
        Self::with_sink(store, config, Arc::new(LoggingAlarmSink))
    }

    pub fn with_sink(store: S, config: HealthConfig, sink: Arc<dyn AlarmSink>) -> Self {
        Self {
            store,
            config,
            sink,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn check(&self) -> Result<HealthReport> {
        let counts = self.store.count_by_status().await?;

        metrics::gauge!("outbox_pending").set(counts.pending as f64);
        metrics::gauge!("outbox_failed").set(counts.failed as f64);

        let mut alarms = Vec::new();
        if counts.pending > self.config.pending_threshold {
            alarms.push(Alarm::PendingBacklog {
                count: counts.pending,
                threshold: self.config.pending_threshold,
            });
        }
        if counts.failed > self.config.failed_threshold {
            alarms.push(Alarm::FailedBacklog {
                count: counts.failed,
                threshold: self.config.failed_threshold,
            });
        }

        for alarm in &alarms {
            self.sink.raise(alarm);
        }

        tracing::debug!(
            pending = counts.pending,
            failed = counts.failed,
            published = counts.published,
            "outbox health checked"
        );

        Ok(HealthReport { counts, alarms })
    }
}

impl<S: OutboxStore + 'static> OutboxHealthMonitor<S> {
    /// Starts checking on the configured schedule.
    pub fn spawn(self) -> TaskHandle {
        let monitor = Arc::new(self);
        let schedule = Schedule::every(monitor.config.interval);

        spawn_periodic("outbox-health", schedule, move || {
            let monitor = Arc::clone(&monitor);
            async move { monitor.check().await.map(|_| ()) }
        })
    }
}
