//! Time source abstraction
//!
//! Quota windows, cache TTLs and experiment dates all read time through
//! [`Clock`] so tests can move time forward without sleeping.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock time
pub trait Clock: Send + Sync + Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared system clock
#[inline]
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually driven clock
///
/// Clones share the same instant, so a test can hand one copy to a
/// component and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create clock fixed at `start`
    #[inline]
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Create clock at a fixed, hour-aligned instant (2024-01-01T00:00:00Z)
    #[must_use]
    pub fn at_epoch() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = saturating_add(*now, by);
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }

    /// Shared handle to this clock
    #[inline]
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow
#[must_use]
pub fn to_chrono(d: Duration) -> chrono::Duration {
    let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 2);
    chrono::Duration::milliseconds(millis)
}

/// `at + by`, clamped to the latest representable instant
#[must_use]
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_chrono(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, clamped to the earliest representable instant
#[must_use]
pub fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_chrono(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at_epoch();
        let shared = clock.shared();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(shared.now(), clock.now());
    }

    #[test]
    fn huge_advance_pins_to_latest_instant() {
        let clock = ManualClock::at_epoch();
        clock.advance(Duration::from_secs(u64::MAX));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn saturating_arithmetic_clamps_both_ends() {
        let start = ManualClock::at_epoch().now();
        let far = Duration::from_secs(10_000_000_000_000);
        assert_eq!(saturating_add(start, far), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_sub(start, far), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            (saturating_add(start, Duration::from_secs(60)) - start).num_seconds(),
            60
        );
    }

    #[test]
    fn system_clock_moves() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
