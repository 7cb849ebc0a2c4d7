//! Redis-backed store.
//!
//! Counters, CIDR sets, and configuration scalars all live in one logical
//! Redis namespace so every Warden instance pointed at the same server
//! draws from the same budget.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::OnceCell;
use tracing::info;

use super::Store;
use crate::error::{Result, WardenError};

/// Atomic increment-and-expire step.
///
/// The expiry must only be set when the key is created; a plain
/// INCRBY + EXPIRE pair would let a concurrent caller refresh the window.
const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if count == tonumber(ARGV[1]) then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return count
"#;

/// Connection settings for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// host:port of the Redis server.
    pub address: String,
    /// Bound on establishing the connection.
    pub dial_timeout: Duration,
    /// Bound on read-side commands.
    pub read_timeout: Duration,
    /// Bound on write-side commands.
    pub write_timeout: Duration,
}

/// A `Store` backed by a shared Redis server.
///
/// The connection is established lazily on first use, so the service comes
/// up (serving cached defaults) even while the store is unreachable.
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    incr_script: Script,
    dial_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisStore {
    /// Create a store for the given server. Does not connect yet.
    pub fn new(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}/", config.address))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            incr_script: Script::new(INCR_WITH_TTL),
            dial_timeout: config.dial_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    /// The shared connection, dialing it on first use.
    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                let conn = tokio::time::timeout(self.dial_timeout, connect)
                    .await
                    .map_err(|_| {
                        WardenError::Store(format!(
                            "dial timed out after {:?}",
                            self.dial_timeout
                        ))
                    })?
                    .map_err(WardenError::from)?;

                info!("connected to redis store");
                Ok::<_, WardenError>(conn)
            })
            .await?;

        Ok(conn.clone())
    }

    /// Run a store command under a deadline. A lapsed deadline is a store
    /// error, which callers treat as fail-open.
    async fn bounded<T>(
        &self,
        deadline: Duration,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map_err(WardenError::from),
            Err(_) => Err(WardenError::Store(format!(
                "store call timed out after {:?}",
                deadline
            ))),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);

        self.bounded(self.write_timeout, async {
            self.incr_script
                .key(key)
                .arg(delta)
                .arg(ttl_secs)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn set_add(&self, set: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded(self.write_timeout, conn.sadd::<_, _, ()>(set, members))
            .await
    }

    async fn set_remove(&self, set: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded(self.write_timeout, conn.srem::<_, _, ()>(set, members))
            .await
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        self.bounded(self.read_timeout, conn.smembers::<_, Vec<String>>(set))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        self.bounded(self.read_timeout, conn.get::<_, Option<String>>(key))
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded(self.write_timeout, conn.set::<_, _, ()>(key, value))
            .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded(
            self.write_timeout,
            conn.hset::<_, _, _, ()>(key, field, value),
        )
        .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        self.bounded(
            self.read_timeout,
            conn.hgetall::<_, HashMap<String, String>>(key),
        )
        .await
    }
}
