//! Redis-backed coordination store.
//!
//! Uses `SET key value NX PX ttl` for acquisition and Lua scripts for the
//! owner-checked operations, so each check-then-act runs as one atomic step
//! on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::{CoordinationError, CoordinationStore, Result};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Coordination store over a shared Redis instance.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl RedisCoordinationStore {
    /// Connects to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Unavailable`] if the connection cannot be
    /// established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoordinationError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!("connected to redis coordination store");

        Ok(Self { conn })
    }

    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::Script::new(COMPARE_AND_EXPIRE)
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }
}
