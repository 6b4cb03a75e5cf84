// Message quota policy
// Decides whether a new user message is admitted given the count of
// user-authored messages in the trailing window. Premium bypasses entirely.

use crate::config::TimeFrame;
use chrono::{DateTime, Utc};

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub current_count: i64,
    /// Messages left in the window. `None` means unlimited (premium),
    /// which is distinct from `Some(0)`.
    pub remaining: Option<i64>,
}

/// Per-instance quota configuration. Constructed once at startup from
/// AppConfig; tests can build several with different limits without
/// touching any shared state.
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    limit: i64,
    time_frame: TimeFrame,
}

impl QuotaPolicy {
    pub fn new(limit: i64, time_frame: TimeFrame) -> Self {
        Self { limit, time_frame }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn time_frame(&self) -> TimeFrame {
        self.time_frame
    }

    /// Lower bound of the sliding window. Recomputed on every check;
    /// never aligned to calendar boundaries.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.time_frame.window()
    }

    pub fn evaluate(&self, is_premium: bool, window_count: i64) -> QuotaDecision {
        if is_premium {
            return QuotaDecision {
                allowed: true,
                current_count: 0,
                remaining: None,
            };
        }

        QuotaDecision {
            allowed: window_count < self.limit,
            current_count: window_count,
            remaining: Some((self.limit - window_count).max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> QuotaPolicy {
        QuotaPolicy::new(10, TimeFrame::Minute)
    }

    #[test]
    fn test_standard_user_under_limit() {
        let decision = policy().evaluate(false, 4);
        assert!(decision.allowed);
        assert_eq!(decision.current_count, 4);
        assert_eq!(decision.remaining, Some(6));
    }

    #[test]
    fn test_standard_user_at_limit() {
        let decision = policy().evaluate(false, 10);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, Some(0));
    }

    #[test]
    fn test_standard_user_over_limit_clamps_remaining() {
        // Over-admission from a historical race can leave the count above
        // the limit; remaining must never go negative.
        let decision = policy().evaluate(false, 13);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, Some(0));
    }

    #[test]
    fn test_last_message_in_window() {
        let decision = policy().evaluate(false, 9);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(1));
    }

    #[test]
    fn test_premium_never_rejected() {
        for count in [0, 9, 10, 100_000] {
            let decision = policy().evaluate(true, count);
            assert!(decision.allowed);
            assert_eq!(decision.current_count, 0);
            assert_eq!(decision.remaining, None);
        }
    }

    #[test]
    fn test_window_start_is_sliding() {
        let policy = QuotaPolicy::new(10, TimeFrame::Minute);
        let now = Utc::now();
        assert_eq!(policy.window_start(now), now - Duration::seconds(60));

        // A message at t=0 falls out exactly when now passes t0 + window.
        let t0 = now - Duration::seconds(61);
        assert!(t0 < policy.window_start(now));
        let t1 = now - Duration::seconds(59);
        assert!(t1 >= policy.window_start(now));
    }

    #[test]
    fn test_independent_policies_do_not_interfere() {
        let strict = QuotaPolicy::new(1, TimeFrame::Minute);
        let loose = QuotaPolicy::new(100, TimeFrame::Hour);
        assert!(!strict.evaluate(false, 1).allowed);
        assert!(loose.evaluate(false, 1).allowed);
    }
}
