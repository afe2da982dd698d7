//! Admission decisions produced by the sliding-window limiter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one quota evaluation for an identity key.
///
/// Computed fresh per request and attached to the response whether the
/// request was admitted or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Maximum admissions per window
    pub limit: u32,
    /// Admissions left in the current window after this request
    pub remaining: u32,
    /// When the oldest admission in the window expires
    pub reset_at: DateTime<Utc>,
    /// Set when the counter store was unavailable and the decision is a
    /// fail-open placeholder rather than a real count
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl AdmissionDecision {
    /// Decision for a request that consumed one unit of quota.
    pub fn admitted(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            degraded: false,
        }
    }

    /// Decision for a request over quota.
    pub fn denied(limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            degraded: false,
        }
    }

    /// Placeholder decision used when the counter store cannot be reached.
    pub fn fail_open(limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at,
            degraded: true,
        }
    }

    /// Reset time as Unix epoch milliseconds (the `X-RateLimit-Reset` value).
    pub fn reset_at_ms(&self) -> i64 {
        self.reset_at.timestamp_millis()
    }

    /// Whole seconds until the window frees a slot, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            ((millis + 999) / 1000) as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_denied_has_no_remaining() {
        let reset = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let decision = AdmissionDecision::denied(3, reset);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc.timestamp_millis_opt(1_000).unwrap();
        let decision = AdmissionDecision::denied(1, Utc.timestamp_millis_opt(2_001).unwrap());
        assert_eq!(decision.retry_after_secs(now), 2);

        let expired = AdmissionDecision::denied(1, Utc.timestamp_millis_opt(500).unwrap());
        assert_eq!(expired.retry_after_secs(now), 0);
    }

    #[test]
    fn test_degraded_flag_only_serialized_when_set() {
        let reset = Utc.timestamp_millis_opt(0).unwrap();
        let normal = serde_json::to_value(AdmissionDecision::admitted(3, 2, reset)).unwrap();
        assert!(normal.get("degraded").is_none());

        let degraded = serde_json::to_value(AdmissionDecision::fail_open(3, reset)).unwrap();
        assert_eq!(degraded["degraded"], true);
        assert_eq!(degraded["allowed"], true);
    }
}
