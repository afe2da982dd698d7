//! Sliding-window limiter with a fail-open policy.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reelgate_models::{AdmissionDecision, IdentityKey};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{window_end, CounterStore};

/// Metric names.
pub mod names {
    pub const QUOTA_DECISIONS_TOTAL: &str = "reelgate_quota_decisions_total";
    pub const QUOTA_FAIL_OPEN_TOTAL: &str = "reelgate_quota_fail_open_total";
}

/// Shortest accepted window.
pub const MIN_WINDOW: Duration = Duration::from_secs(1);
/// Longest accepted window (one year).
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 86_400);

/// Quota parameters. Deployment configuration, not protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum admissions per window
    pub limit: u32,
    /// Rolling window length
    pub window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: 3,
            window: Duration::from_secs(86_400),
        }
    }
}

impl LimiterConfig {
    /// Create a config. The window is clamped to `MIN_WINDOW..=MAX_WINDOW`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window: window.clamp(MIN_WINDOW, MAX_WINDOW),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let limit = std::env::var("QUOTA_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.limit);
        let window = match std::env::var("QUOTA_WINDOW_SECS") {
            Ok(raw) => Self::parse_window(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Invalid QUOTA_WINDOW_SECS, using default");
                defaults.window
            }),
            Err(_) => defaults.window,
        };
        Self::new(limit, window)
    }

    /// Parse a window in seconds. Zero and non-numeric values are rejected.
    fn parse_window(raw: &str) -> Option<Duration> {
        raw.trim()
            .parse::<u64>()
            .ok()
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

/// Turns an identity key into an admission decision.
///
/// Holds no mutable state; all counting lives in the store. A store
/// failure admits the request and is logged and counted.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self {
            store,
            config: LimiterConfig::new(config.limit, config.window),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Evaluate one request for `key`, consuming a slot if admitted.
    pub async fn check(&self, key: &IdentityKey) -> AdmissionDecision {
        let result = self
            .store
            .increment_and_check(key.as_str(), self.config.window, self.config.limit)
            .await;

        match result {
            Ok(decision) => {
                let outcome = if decision.allowed { "allowed" } else { "denied" };
                counter!(names::QUOTA_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
                debug!(
                    identity = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Quota evaluated"
                );
                decision
            }
            Err(e) => {
                counter!(names::QUOTA_FAIL_OPEN_TOTAL, "reason" => e.kind()).increment(1);
                counter!(names::QUOTA_DECISIONS_TOTAL, "outcome" => "fail_open").increment(1);
                warn!(
                    identity = %key,
                    error = %e,
                    "Counter store unavailable, admitting without quota"
                );
                let reset_at = window_end(self.clock.now(), self.config.window);
                AdmissionDecision::fail_open(self.config.limit, reset_at)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{StoreError, StoreResult};
    use crate::memory::InMemoryCounterStore;
    use async_trait::async_trait;

    const DAY: Duration = Duration::from_secs(86_400);

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment_and_check(
            &self,
            _key: &str,
            _window: Duration,
            _limit: u32,
        ) -> StoreResult<AdmissionDecision> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    fn limiter(limit: u32, window: Duration) -> (SlidingWindowLimiter, ManualClock) {
        let clock = ManualClock::at_epoch_ms(1_700_000_000_000);
        let store = Arc::new(InMemoryCounterStore::with_clock(Arc::new(clock.clone())));
        let limiter = SlidingWindowLimiter::new(store, LimiterConfig::new(limit, window))
            .with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_denies_once_limit_reached() {
        for limit in [1, 3, 7] {
            let (limiter, _) = limiter(limit, DAY);
            let caller = key("user-k");
            for _ in 0..limit {
                assert!(limiter.check(&caller).await.allowed);
            }
            let decision = limiter.check(&caller).await;
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
            assert_eq!(decision.limit, limit);
        }
    }

    #[tokio::test]
    async fn test_fresh_window_after_window_elapses() {
        let (limiter, clock) = limiter(3, Duration::from_secs(3600));
        let caller = key("user-k");
        for _ in 0..4 {
            limiter.check(&caller).await;
        }

        clock.advance(Duration::from_secs(3600));
        let decision = limiter.check(&caller).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_down() {
        let clock = ManualClock::at_epoch_ms(0);
        let limiter = SlidingWindowLimiter::new(Arc::new(DownStore), LimiterConfig::new(3, DAY))
            .with_clock(Arc::new(clock));

        let decision = limiter.check(&key("user-k")).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.remaining, 3);
        assert_eq!(decision.reset_at_ms(), 86_400_000);
    }

    #[tokio::test]
    async fn test_daily_quota_scenario() {
        let (limiter, _) = limiter(1, DAY);
        let a = key("caller-a");
        let b = key("caller-b");

        let first = limiter.check(&a).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = limiter.check(&a).await;
        assert!(!second.allowed);
        assert_eq!(second.limit, 1);
        assert_eq!(second.remaining, 0);

        assert!(limiter.check(&b).await.allowed);
    }

    #[test]
    fn test_config_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.limit, 3);
        assert_eq!(config.window, DAY);
    }

    #[test]
    fn test_config_clamps_window() {
        assert_eq!(LimiterConfig::new(3, Duration::ZERO).window, MIN_WINDOW);
        assert_eq!(
            LimiterConfig::new(3, Duration::from_secs(1_000_000_000_000_000)).window,
            MAX_WINDOW
        );
        assert_eq!(LimiterConfig::new(3, DAY).window, DAY);
    }

    #[test]
    fn test_window_parsing_rejects_zero() {
        assert_eq!(LimiterConfig::parse_window("0"), None);
        assert_eq!(LimiterConfig::parse_window("-5"), None);
        assert_eq!(LimiterConfig::parse_window("day"), None);
        assert_eq!(LimiterConfig::parse_window(" 3600 "), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_huge_window_does_not_panic() {
        let window = Duration::from_secs(1_000_000_000_000_000);
        let (limiter, _) = limiter(3, window);
        let decision = limiter.check(&key("user-k")).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);

        let down = SlidingWindowLimiter::new(Arc::new(DownStore), LimiterConfig::new(3, window))
            .with_clock(Arc::new(ManualClock::at_epoch_ms(0)));
        assert!(down.check(&key("user-k")).await.allowed);
    }
}
