//! Counter store contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reelgate_models::AdmissionDecision;

use crate::error::StoreResult;

/// Shared store that counts admissions per key over a sliding window.
///
/// `increment_and_check` must be atomic per key: concurrent callers on the
/// same key never lose an update. A slot is consumed only when the call
/// returns `allowed = true`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment_and_check(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
    ) -> StoreResult<AdmissionDecision>;

    /// Cheap liveness check used by readiness endpoints.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Build a decision from the raw sliding-log result shared by every store.
///
/// `count` is the number of admissions in the window after this call and
/// `oldest_ms` the timestamp of the oldest one still inside it.
pub(crate) fn decision_from_log(
    allowed: bool,
    count: u32,
    oldest_ms: i64,
    window: Duration,
    limit: u32,
) -> AdmissionDecision {
    let reset_at = window_end(epoch_ms(oldest_ms), window);
    if allowed {
        AdmissionDecision::admitted(limit, limit.saturating_sub(count), reset_at)
    } else {
        AdmissionDecision::denied(limit, reset_at)
    }
}

pub(crate) fn epoch_ms(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

/// End of a window opened at `start`, saturating at the latest representable time.
pub(crate) fn window_end(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(window)
        .ok()
        .and_then(|w| start.checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Window length in milliseconds, saturating at `i64::MAX`.
pub(crate) fn window_ms(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}
