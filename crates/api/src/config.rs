//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use coordination::LockOptions;
use idempotency::{IdempotencyConfig, IdempotencyReaperConfig};
use outbox::{HealthConfig, PublisherConfig, ReaperConfig};
use transactions::{ConsumerConfig, TransactionTopics};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human output
/// - `REDIS_URL`: coordination store; in-memory when unset
/// - `DATABASE_URL`: Postgres idempotency ledger; in-memory when unset
/// - `KAFKA_BROKERS`: event log brokers (needs the `kafka` feature); in-memory when unset
/// - `OUTBOX_BATCH_SIZE`, `OUTBOX_PUBLISH_INTERVAL_SECS`, `OUTBOX_INITIAL_DELAY_SECS`,
///   `OUTBOX_MAX_ATTEMPTS`, `OUTBOX_RETENTION_DAYS`, `OUTBOX_PENDING_THRESHOLD`,
///   `OUTBOX_FAILED_THRESHOLD`
/// - `IDEMPOTENCY_TTL_HOURS`, `IDEMPOTENCY_STUCK_MINUTES`
/// - `LOCK_LEASE_TTL_MS`, `LOCK_WAIT_TIMEOUT_MS`
/// - `FRAUD_CONSUMER_CONCURRENCY`, `FRAUD_CONSUMER_GROUP`
/// - `TRANSACTION_EVENTS_TOPIC`, `FRAUD_REQUESTS_TOPIC`, `FRAUD_RESULTS_TOPIC`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub kafka_brokers: Option<String>,
    pub outbox_batch_size: usize,
    pub outbox_publish_interval: Duration,
    pub outbox_initial_delay: Duration,
    pub outbox_max_attempts: u32,
    pub outbox_retention_days: u32,
    pub outbox_pending_threshold: u64,
    pub outbox_failed_threshold: u64,
    pub idempotency_ttl: Duration,
    pub idempotency_stuck_threshold: Duration,
    pub lock_lease_ttl: Duration,
    pub lock_wait_timeout: Duration,
    pub fraud_consumer_concurrency: usize,
    pub fraud_consumer_group: String,
    pub topics: TransactionTopics,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            redis_url: non_empty("REDIS_URL"),
            database_url: non_empty("DATABASE_URL"),
            kafka_brokers: non_empty("KAFKA_BROKERS"),
            outbox_batch_size: parse_var(&lookup, "OUTBOX_BATCH_SIZE")
                .unwrap_or(defaults.outbox_batch_size),
            outbox_publish_interval: parse_var(&lookup, "OUTBOX_PUBLISH_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.outbox_publish_interval),
            outbox_initial_delay: parse_var(&lookup, "OUTBOX_INITIAL_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.outbox_initial_delay),
            outbox_max_attempts: parse_var(&lookup, "OUTBOX_MAX_ATTEMPTS")
                .unwrap_or(defaults.outbox_max_attempts),
            outbox_retention_days: parse_var(&lookup, "OUTBOX_RETENTION_DAYS")
                .unwrap_or(defaults.outbox_retention_days),
            outbox_pending_threshold: parse_var(&lookup, "OUTBOX_PENDING_THRESHOLD")
                .unwrap_or(defaults.outbox_pending_threshold),
            outbox_failed_threshold: parse_var(&lookup, "OUTBOX_FAILED_THRESHOLD")
                .unwrap_or(defaults.outbox_failed_threshold),
            idempotency_ttl: parse_var(&lookup, "IDEMPOTENCY_TTL_HOURS")
                .map(|h: u64| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.idempotency_ttl),
            idempotency_stuck_threshold: parse_var(&lookup, "IDEMPOTENCY_STUCK_MINUTES")
                .map(|m: u64| Duration::from_secs(m * 60))
                .unwrap_or(defaults.idempotency_stuck_threshold),
            lock_lease_ttl: parse_var(&lookup, "LOCK_LEASE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_lease_ttl),
            lock_wait_timeout: parse_var(&lookup, "LOCK_WAIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait_timeout),
            fraud_consumer_concurrency: parse_var(&lookup, "FRAUD_CONSUMER_CONCURRENCY")
                .unwrap_or(defaults.fraud_consumer_concurrency),
            fraud_consumer_group: lookup("FRAUD_CONSUMER_GROUP")
                .unwrap_or(defaults.fraud_consumer_group),
            topics: TransactionTopics {
                events: lookup("TRANSACTION_EVENTS_TOPIC").unwrap_or(defaults.topics.events),
                fraud_requests: lookup("FRAUD_REQUESTS_TOPIC")
                    .unwrap_or(defaults.topics.fraud_requests),
                fraud_results: lookup("FRAUD_RESULTS_TOPIC")
                    .unwrap_or(defaults.topics.fraud_results),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            batch_size: self.outbox_batch_size,
            max_attempts: self.outbox_max_attempts,
            interval: self.outbox_publish_interval,
            initial_delay: self.outbox_initial_delay,
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            retention_days: self.outbox_retention_days,
            ..ReaperConfig::default()
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            pending_threshold: self.outbox_pending_threshold,
            failed_threshold: self.outbox_failed_threshold,
            ..HealthConfig::default()
        }
    }

    pub fn idempotency_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            ttl: self.idempotency_ttl,
            ..IdempotencyConfig::default()
        }
    }

    pub fn idempotency_reaper_config(&self) -> IdempotencyReaperConfig {
        IdempotencyReaperConfig {
            stuck_threshold: self.idempotency_stuck_threshold,
            ..IdempotencyReaperConfig::default()
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions::new(self.lock_lease_ttl, self.lock_wait_timeout)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            topic: self.topics.fraud_results.clone(),
            group: self.fraud_consumer_group.clone(),
            concurrency: self.fraud_consumer_concurrency,
            ..ConsumerConfig::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let publisher = PublisherConfig::default();
        let health = HealthConfig::default();
        let lock = LockOptions::default();
        let consumer = ConsumerConfig::default();

        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            redis_url: None,
            database_url: None,
            kafka_brokers: None,
            outbox_batch_size: publisher.batch_size,
            outbox_publish_interval: publisher.interval,
            outbox_initial_delay: publisher.initial_delay,
            outbox_max_attempts: publisher.max_attempts,
            outbox_retention_days: ReaperConfig::default().retention_days,
            outbox_pending_threshold: health.pending_threshold,
            outbox_failed_threshold: health.failed_threshold,
            idempotency_ttl: IdempotencyConfig::default().ttl,
            idempotency_stuck_threshold: IdempotencyReaperConfig::default().stuck_threshold,
            lock_lease_ttl: lock.lease_ttl,
            lock_wait_timeout: lock.wait_timeout,
            fraud_consumer_concurrency: consumer.concurrency,
            fraud_consumer_group: consumer.group,
            topics: TransactionTopics::default(),
        }
    }
}
