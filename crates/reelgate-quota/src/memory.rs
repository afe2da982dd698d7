//! In-process counter store.
//!
//! Same sliding-log semantics as the Redis store, for development setups
//! without Redis and for tests. Not shared between processes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelgate_models::AdmissionDecision;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::store::{decision_from_log, window_ms, CounterStore};

/// Key count above which a new key triggers a sweep of expired logs.
pub const MAX_TRACKED_KEYS: usize = 10_000;

/// Admission timestamps (epoch ms) per key, oldest first.
pub struct InMemoryCounterStore {
    logs: Mutex<HashMap<String, VecDeque<i64>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of admissions currently recorded for a key, expired or not.
    pub async fn recorded(&self, key: &str) -> usize {
        self.logs.lock().await.get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys with a log in memory.
    pub async fn tracked_keys(&self) -> usize {
        self.logs.lock().await.len()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_and_check(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<AdmissionDecision> {
        let now = self.clock.now_ms();
        let expired_before = now.saturating_sub(window_ms(window));

        let mut logs = self.logs.lock().await;
        if logs.len() >= MAX_TRACKED_KEYS && !logs.contains_key(key) {
            logs.retain(|_, log| log.back().is_some_and(|&ts| ts > expired_before));
            debug!(remaining = logs.len(), "Evicted idle quota logs");
        }

        let log = logs.entry(key.to_string()).or_default();
        while log.front().is_some_and(|&ts| ts <= expired_before) {
            log.pop_front();
        }

        let allowed = (log.len() as u64) < u64::from(limit);
        if allowed {
            log.push_back(now);
        }

        let count = log.len() as u32;
        let oldest = log.front().copied().unwrap_or(now);

        if log.is_empty() {
            logs.remove(key);
        }

        Ok(decision_from_log(allowed, count, oldest, window, limit))
    }
}
