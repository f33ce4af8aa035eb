//! Time source abstraction.
//!
//! Quota resets at the UTC day boundary and budget at the UTC month
//! boundary, so the components that enforce them take a [`Clock`] rather
//! than calling `Utc::now()` directly. Production uses [`SystemClock`];
//! tests drive rollover with [`ManualClock`].

use std::sync::RwLock;

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// A source of UTC wall-clock time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Create a clock frozen at a calendar date (midnight UTC).
    ///
    /// Invalid dates fall back to the Unix epoch rather than panicking.
    pub fn at_date(year: i32, month: u32, day: u32) -> Self {
        let start = Utc
            .with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default());
        Self::new(start)
    }

    /// Jump the clock to a calendar date (midnight UTC).
    pub fn set_date(&self, year: i32, month: u32, day: u32) {
        if let Some(ts) = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single() {
            self.set(ts);
        }
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now
            .read()
            .map(|g| *g)
            .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
    }
}

/// Billing-period marker for a timestamp: `year * 100 + month`.
///
/// Two timestamps share a marker exactly when they fall in the same UTC
/// calendar month, which is the budget rollover condition.
pub fn period_marker(ts: DateTime<Utc>) -> i64 {
    i64::from(ts.year()) * 100 + i64::from(ts.month())
}

/// UTC calendar-day key for a timestamp (`YYYY-MM-DD`), used to scope
/// daily quota counters.
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_frozen_until_advanced() {
        let clock = ManualClock::at_date(2025, 3, 15);
        let a = clock.now_utc();
        let b = clock.now_utc();
        assert_eq!(a, b);
    }

    #[test]
    fn test_manual_clock_advance_moves_time_forward() {
        let clock = ManualClock::at_date(2025, 3, 15);
        let before = clock.now_utc();
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now_utc() - before, chrono::Duration::days(1));
    }

    #[test]
    fn test_period_marker_distinguishes_adjacent_months() {
        let march = ManualClock::at_date(2025, 3, 31).now_utc();
        let april = ManualClock::at_date(2025, 4, 1).now_utc();
        assert_ne!(period_marker(march), period_marker(april));
        assert_eq!(period_marker(march), 202503);
    }

    #[test]
    fn test_period_marker_same_within_month() {
        let early = ManualClock::at_date(2025, 7, 1).now_utc();
        let late = ManualClock::at_date(2025, 7, 31).now_utc();
        assert_eq!(period_marker(early), period_marker(late));
    }

    #[test]
    fn test_day_key_formats_zero_padded() {
        let ts = ManualClock::at_date(2025, 3, 5).now_utc();
        assert_eq!(day_key(ts), "2025-03-05");
    }
}
