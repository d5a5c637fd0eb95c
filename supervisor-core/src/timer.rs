//! Elapsed-time measurement over the controller's free-running millisecond counter.
//!
//! Every supervisor deadline (fault windows, heartbeat windows, stop timeouts,
//! start delays) is expressed as a [`Timer`] that is reset on some transition
//! and polled against the `now` sample taken once per tick. Nothing here
//! sleeps or blocks.

use core::ops::{Add, AddAssign};
use core::time::Duration;

/// Sample of a wrapping 32-bit millisecond counter.
///
/// The counter rolls over roughly every 49.7 days. Differences between two
/// samples are computed with modular subtraction, so a [`Timer`] started just
/// before the rollover still reports the correct elapsed time afterwards.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Millis(pub u32);

impl Millis {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_millis(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Returns the time elapsed from `earlier` to `self`, modulo the counter width.
    #[must_use]
    pub fn wrapping_since(self, earlier: Self) -> Duration {
        Duration::from_millis(u64::from(self.0.wrapping_sub(earlier.0)))
    }
}

impl Add<Duration> for Millis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.wrapping_add(duration_to_millis(rhs)))
    }
}

impl AddAssign<Duration> for Millis {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

/// Converts a duration to whole milliseconds, saturating at `u32::MAX`.
#[must_use]
pub fn duration_to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Start timestamp that answers "has `limit` elapsed since the last reset".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Timer {
    start: Millis,
}

impl Timer {
    /// Creates a timer that starts counting at `now`.
    #[must_use]
    pub const fn new(now: Millis) -> Self {
        Self { start: now }
    }

    /// Restarts the timer at `now`.
    pub fn reset(&mut self, now: Millis) {
        self.start = now;
    }

    /// Sample captured by the last [`Timer::reset`].
    #[must_use]
    pub const fn started_at(&self) -> Millis {
        self.start
    }

    /// Time elapsed since the last reset; correct across counter rollover.
    #[must_use]
    pub fn elapsed(&self, now: Millis) -> Duration {
        now.wrapping_since(self.start)
    }

    #[must_use]
    pub fn exceeds(&self, now: Millis, limit: Duration) -> bool {
        self.elapsed(now) >= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_tracks_time_since_reset() {
        let mut timer = Timer::new(Millis(100));
        assert_eq!(timer.elapsed(Millis(350)), Duration::from_millis(250));

        timer.reset(Millis(1_000));
        assert_eq!(timer.started_at(), Millis(1_000));
        assert_eq!(timer.elapsed(Millis(1_000)), Duration::ZERO);
    }

    #[test]
    fn elapsed_survives_counter_rollover() {
        let timer = Timer::new(Millis(u32::MAX - 499));
        let now = Millis(u32::MAX - 499) + Duration::from_millis(1_500);

        assert_eq!(now, Millis(1_000));
        assert_eq!(timer.elapsed(now), Duration::from_millis(1_500));
        assert!(timer.exceeds(now, Duration::from_millis(1_500)));
        assert!(!timer.exceeds(now, Duration::from_millis(1_501)));
    }

    #[test]
    fn exceeds_is_inclusive_at_the_limit() {
        let timer = Timer::new(Millis::ZERO);
        assert!(!timer.exceeds(Millis(14_999), Duration::from_secs(15)));
        assert!(timer.exceeds(Millis(15_000), Duration::from_secs(15)));
    }

    #[test]
    fn oversized_durations_saturate() {
        assert_eq!(duration_to_millis(Duration::from_secs(u64::MAX)), u32::MAX);
        assert_eq!(duration_to_millis(Duration::from_millis(42)), 42);
    }
}
