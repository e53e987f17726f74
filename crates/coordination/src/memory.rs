use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SharedClock, SystemClock};
use tokio::sync::Mutex;

use crate::{CoordinationError, CoordinationStore, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory coordination store for tests and single-process deployments.
///
/// TTLs are evaluated against the injected clock; expired entries are treated
/// as absent and dropped lazily.
#[derive(Debug, Clone)]
pub struct InMemoryCoordinationStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: SharedClock,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationStore {
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Creates an empty store reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates a store outage (`false`) or its recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the remaining TTL of a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| (entry.expires_at - now).to_std().ok())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinationError::Unavailable(
                "in-memory coordination store is offline".to_string(),
            ))
        }
    }

    fn expiry(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CoordinationError::Command(format!("invalid ttl: {e}")))?;
        Ok(self.clock.now() + ttl)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.ensure_available()?;
        let expires_at = self.expiry(ttl)?;
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        self.ensure_available()?;
        let expires_at = self.expiry(ttl)?;
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now && entry.value == expected => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
