//! Timer-driven background tasks.
//!
//! Each task is single-purpose: it waits an initial delay, then runs its tick
//! function on a fixed interval until stopped. A failing tick is logged and the
//! loop keeps going, so one bad run never halts the schedule.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// When a periodic task first runs and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Schedule {
    /// Runs immediately, then every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            interval,
        }
    }

    /// Delays the first run by `delay`.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Handle to a running periodic task.
///
/// Dropping the handle also stops the task after its current run.
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Returns the task name used in log output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true once the task loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the task to stop and waits for the current run to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await
            && e.is_panic()
        {
            tracing::error!(task = self.name, "periodic task panicked");
        }
    }
}

/// Spawns `tick` on the tokio runtime according to `schedule`.
pub fn spawn_periodic<F, Fut, E>(name: &'static str, schedule: Schedule, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (shutdown, mut stop_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        tracing::info!(
            task = name,
            initial_delay_ms = schedule.initial_delay.as_millis() as u64,
            interval_ms = schedule.interval.as_millis() as u64,
            "periodic task started"
        );

        tokio::select! {
            () = tokio::time::sleep(schedule.initial_delay) => {}
            _ = stop_rx.changed() => {
                tracing::info!(task = name, "periodic task stopped before first run");
                return;
            }
        }

        let mut interval = tokio::time::interval(schedule.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop_rx.changed() => break,
            }

            if let Err(e) = tick().await {
                tracing::error!(task = name, error = %e, "periodic task run failed");
            }
        }

        tracing::info!(task = name, "periodic task stopped");
    });

    TaskHandle {
        name,
        shutdown,
        join,
    }
}
