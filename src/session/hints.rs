//! Timer-gated hint visibility.
//!
//! The countdown is anchored to the persisted `start_time` of the
//! current question, so it is a pure function of `now - start_time`.
//! Reloading or reconstructing the controller cannot reset it; only
//! advancing to the next question (which re-anchors `start_time`)
//! restarts the countdown.

use chrono::{DateTime, Utc};

/// Seconds a team must wait on a question before its hint unlocks.
pub const DEFAULT_HINT_DELAY_SECS: i64 = 300;

/// Seconds until the hint unlocks, clamped at zero.
///
/// A `now` earlier than `start_time` (clock skew) yields the full
/// delay rather than an instant unlock.
pub fn remaining_secs(start_time: DateTime<Utc>, now: DateTime<Utc>, delay_secs: i64) -> i64 {
    let elapsed = (now - start_time).num_seconds();
    if elapsed < 0 {
        return delay_secs;
    }
    (delay_secs - elapsed).max(0)
}

/// Hint content becomes visible exactly when the countdown reaches zero.
pub fn hint_unlocked(start_time: DateTime<Utc>, now: DateTime<Utc>, delay_secs: i64) -> bool {
    remaining_secs(start_time, now, delay_secs) == 0
}

/// `m:ss` rendering used by UI-adjacent callers.
pub fn format_mm_ss(secs: i64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn anchor() -> DateTime<Utc> {
        "2026-03-14T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn counts_down_from_full_delay() {
        let start = anchor();
        assert_eq!(remaining_secs(start, start, 300), 300);
        assert_eq!(remaining_secs(start, start + Duration::seconds(90), 300), 210);
        assert_eq!(remaining_secs(start, start + Duration::seconds(300), 300), 0);
    }

    #[test]
    fn clamps_at_zero_after_expiry() {
        let start = anchor();
        assert_eq!(
            remaining_secs(start, start + Duration::seconds(100_000), 300),
            0
        );
    }

    #[test]
    fn unlocks_exactly_at_zero() {
        let start = anchor();
        assert!(!hint_unlocked(start, start + Duration::seconds(299), 300));
        assert!(hint_unlocked(start, start + Duration::seconds(300), 300));
    }

    #[test]
    fn reload_invariant_depends_only_on_elapsed() {
        // Two different anchors, same elapsed time: same remaining.
        let a = anchor();
        let b = anchor() + Duration::days(2);
        let elapsed = Duration::seconds(123);
        assert_eq!(
            remaining_secs(a, a + elapsed, 300),
            remaining_secs(b, b + elapsed, 300)
        );
    }

    #[test]
    fn skewed_clock_yields_full_delay() {
        let start = anchor();
        assert_eq!(remaining_secs(start, start - Duration::seconds(30), 300), 300);
    }

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_mm_ss(300), "5:00");
        assert_eq!(format_mm_ss(61), "1:01");
        assert_eq!(format_mm_ss(0), "0:00");
    }
}
