//! Clock sources for record timestamps.
//!
//! Stores stamp `created_at` / `updated_at` through a [`Clock`] so tests can
//! pin creation order without sleeping.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of record timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
///
/// Every call to [`Clock::now`] returns the current instant and then moves
/// the clock forward by `step`, so consecutive records get strictly
/// increasing timestamps.
///
/// # Examples
///
/// ```
/// use chrono::Duration;
/// use linkage::time::{Clock, ManualClock};
///
/// let clock = ManualClock::starting_at(chrono::Utc::now(), Duration::seconds(1));
/// let a = clock.now();
/// let b = clock.now();
/// assert_eq!(b - a, Duration::seconds(1));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    current: DateTime<Utc>,
    step: Duration,
}

impl ManualClock {
    /// Creates a clock at `start` that advances by `step` per reading.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            state: Mutex::new(ManualState {
                current: start,
                step,
            }),
        }
    }

    /// Moves the clock by `by` (may be negative).
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.current += by;
    }

    /// Jumps the clock to `to`.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.current = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now(), Duration::milliseconds(1))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = state.current;
        state.current = now + state.step;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_steps() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start, Duration::seconds(2));
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::seconds(2));
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start, Duration::zero());
        clock.advance(Duration::hours(-1));
        assert_eq!(clock.now(), start - Duration::hours(1));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
