//! Redis sorted-set counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use reelgate_models::AdmissionDecision;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::store::{decision_from_log, window_ms, CounterStore};

/// Trim, count and conditionally record in one round trip.
///
/// KEYS[1] = log key
/// ARGV = now_ms, window_ms, limit, member
/// Returns {allowed, count, oldest_ms}.
const SLIDING_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    count = count + 1
    allowed = 1
end
if count > 0 then
    redis.call('PEXPIRE', key, window)
end

local oldest = now
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
    oldest = tonumber(head[2])
end
return {allowed, count, oldest}
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix for rate limit keys
    pub key_prefix: String,
    /// Upper bound on a single store call, connection included
    pub timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "reelgate:ratelimit".to_string(),
            timeout: Duration::from_millis(500),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            timeout: std::env::var("QUOTA_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Counter store backed by one Redis sorted set per identity key.
pub struct RedisCounterStore {
    client: redis::Client,
    config: RedisStoreConfig,
    script: Script,
    conn: Mutex<Option<MultiplexedConnection>>,
    clock: Arc<dyn Clock>,
}

impl RedisCounterStore {
    /// Create a store. No connection is made until first use.
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            config,
            script: Script::new(SLIDING_LOG_SCRIPT),
            conn: Mutex::new(None),
            clock: Arc::new(SystemClock),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn log_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Reuse the multiplexed connection, reconnecting after a failure.
    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        debug!("Opening Redis connection for counter store");
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_connection(&self) {
        *self.conn.lock().await = None;
    }

    async fn run_script(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<(i64, i64, i64)> {
        let mut conn = self.connection().await?;
        let now = self.clock.now_ms();
        let member = format!("{}-{}", now, Uuid::new_v4().simple());

        let result: (i64, i64, i64) = self
            .script
            .key(self.log_key(key))
            .arg(now)
            .arg(window_ms(window))
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn with_timeout<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let result = match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.timeout.as_millis() as u64)),
        };
        if let Err(e) = &result {
            warn!(error = %e, "Counter store call failed, resetting connection");
            self.drop_connection().await;
        }
        result
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_check(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<AdmissionDecision> {
        let (allowed, count, oldest) = self
            .with_timeout(self.run_script(key, window, limit))
            .await?;

        if count < 0 {
            return Err(StoreError::InvalidResponse(format!(
                "negative window count {}",
                count
            )));
        }

        Ok(decision_from_log(allowed == 1, count as u32, oldest, window, limit))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.with_timeout(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
