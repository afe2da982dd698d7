//! Consecutive failure tracking for repeated status queries.

use tracing::{debug, warn};

/// Counts failures of a repeating operation and throttles their logging.
///
/// The first `max_logged` consecutive failures are worth logging; after that
/// one suppression notice is emitted and the rest stay quiet until a success.
#[derive(Debug, Default, Clone)]
pub struct FailureTracker {
    consecutive: u32,
    total: u32,
    max_logged: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged: u32) -> Self {
        Self {
            max_logged,
            ..Default::default()
        }
    }

    /// Record a successful query (resets the consecutive count).
    pub fn record_success(&mut self) {
        if self.suppressed {
            debug!(
                "Status queries recovered after {} consecutive failures",
                self.consecutive
            );
        }
        self.consecutive = 0;
        self.suppressed = false;
    }

    /// Record a failed query.
    ///
    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.total += 1;

        if self.consecutive <= self.max_logged {
            true
        } else if !self.suppressed {
            self.suppressed = true;
            warn!(
                "Suppressing status query failure logs after {} consecutive failures",
                self.max_logged
            );
            false
        } else {
            false
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.consecutive(), 4);

        tracker.record_success();
        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(tracker.total(), 4);
        assert!(tracker.record_failure());
    }
}
