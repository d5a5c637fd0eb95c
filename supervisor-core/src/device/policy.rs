//! Restart policy and current-level classification.

use core::time::Duration;

use super::CurrentLevel;
use crate::record::Range;

/// Compile-time knobs shared by every device supervisor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorPolicy {
    /// Consecutive restarts after which a further fault kills the device and
    /// leaves it stopped instead of restarting it.
    pub boot_loop_threshold: u8,
    /// Restart count at which [`super::Device::warning`] starts reporting.
    pub warning_reset_count: u8,
    /// Minimum spacing between repeated stop signals while stopping.
    pub stop_message_interval: Duration,
    /// Sensor units a reading must move back past a boundary before a
    /// device leaves the level it is in.
    pub current_hysteresis: i16,
}

impl SupervisorPolicy {
    pub const DEFAULT: Self = Self {
        boot_loop_threshold: 3,
        warning_reset_count: 2,
        stop_message_interval: Duration::from_secs(10),
        current_hysteresis: 5,
    };

    #[must_use]
    pub const fn with_boot_loop_threshold(mut self, threshold: u8) -> Self {
        self.boot_loop_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_warning_reset_count(mut self, count: u8) -> Self {
        self.warning_reset_count = count;
        self
    }

    #[must_use]
    pub const fn with_stop_message_interval(mut self, interval: Duration) -> Self {
        self.stop_message_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_current_hysteresis(mut self, margin: i16) -> Self {
        self.current_hysteresis = margin;
        self
    }
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Level boundaries derived from a calibrated range, widened to `i32` so an
/// uncalibrated `i16::MIN..=i16::MAX` range cannot overflow.
#[derive(Copy, Clone, Debug)]
struct Bounds {
    min: i32,
    ceiling: i32,
    stress_floor: i32,
}

impl Bounds {
    fn new(range: Range, fault_current: i16) -> Self {
        let min = i32::from(range.min);
        let max = i32::from(range.max);
        Self {
            min,
            ceiling: max.min(i32::from(fault_current)),
            stress_floor: max - (max - min) / 4,
        }
    }

    fn classify(self, reading: i32) -> CurrentLevel {
        if reading < self.min {
            CurrentLevel::Low
        } else if reading > self.ceiling {
            CurrentLevel::High
        } else if reading > self.stress_floor {
            CurrentLevel::Stressed
        } else {
            CurrentLevel::Normal
        }
    }
}

/// Classifies one current reading against the calibrated range.
///
/// Below `range.min` is `Low`. Above the lower of `range.max` and
/// `fault_current` is `High`. The top quarter of the range is `Stressed`.
#[must_use]
pub fn classify_current(reading: i16, range: Range, fault_current: i16) -> CurrentLevel {
    Bounds::new(range, fault_current).classify(i32::from(reading))
}

/// Like [`classify_current`], but a device stays at `previous` until the
/// reading has moved at least `margin` units back past the boundary that put
/// it there. Moving to a more severe level is never delayed.
#[must_use]
pub fn classify_current_with_hysteresis(
    previous: CurrentLevel,
    reading: i16,
    range: Range,
    fault_current: i16,
    margin: i16,
) -> CurrentLevel {
    let bounds = Bounds::new(range, fault_current);
    let reading = i32::from(reading);
    let margin = i32::from(margin.max(0));
    let level = bounds.classify(reading);

    let hold = match previous {
        CurrentLevel::High => level != CurrentLevel::High && reading > bounds.ceiling - margin,
        CurrentLevel::Low => level != CurrentLevel::Low && reading < bounds.min + margin,
        CurrentLevel::Stressed => {
            level == CurrentLevel::Normal && reading > bounds.stress_floor - margin
        }
        CurrentLevel::Normal => false,
    };

    if hold { previous } else { level }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: Range = Range::new(10, 120);

    #[test]
    fn classifies_against_the_range() {
        assert_eq!(classify_current(5, RANGE, 120), CurrentLevel::Low);
        assert_eq!(classify_current(10, RANGE, 120), CurrentLevel::Normal);
        assert_eq!(classify_current(93, RANGE, 120), CurrentLevel::Normal);
        assert_eq!(classify_current(94, RANGE, 120), CurrentLevel::Stressed);
        assert_eq!(classify_current(120, RANGE, 120), CurrentLevel::Stressed);
        assert_eq!(classify_current(121, RANGE, 120), CurrentLevel::High);
        assert_eq!(classify_current(200, RANGE, 120), CurrentLevel::High);
    }

    #[test]
    fn fault_current_caps_the_range() {
        assert_eq!(classify_current(105, RANGE, 100), CurrentLevel::High);
        assert_eq!(classify_current(100, RANGE, 100), CurrentLevel::Stressed);
    }

    #[test]
    fn uncalibrated_range_does_not_overflow() {
        let wide = Range::new(i16::MIN, i16::MAX);
        assert_eq!(classify_current(0, wide, i16::MAX), CurrentLevel::Normal);
        assert_eq!(classify_current(i16::MAX, wide, i16::MAX), CurrentLevel::Stressed);
    }

    #[test]
    fn high_holds_until_reading_clears_the_margin() {
        let high = CurrentLevel::High;
        assert_eq!(
            classify_current_with_hysteresis(high, 120, RANGE, 120, 5),
            CurrentLevel::High,
            "jitter at the ceiling must not leave High"
        );
        assert_eq!(
            classify_current_with_hysteresis(high, 116, RANGE, 120, 5),
            CurrentLevel::High
        );
        assert_eq!(
            classify_current_with_hysteresis(high, 115, RANGE, 120, 5),
            CurrentLevel::Stressed
        );
        assert_eq!(
            classify_current_with_hysteresis(high, 40, RANGE, 120, 5),
            CurrentLevel::Normal
        );
    }

    #[test]
    fn low_holds_until_reading_clears_the_margin() {
        let low = CurrentLevel::Low;
        assert_eq!(
            classify_current_with_hysteresis(low, 14, RANGE, 120, 5),
            CurrentLevel::Low
        );
        assert_eq!(
            classify_current_with_hysteresis(low, 15, RANGE, 120, 5),
            CurrentLevel::Normal
        );
        assert_eq!(
            classify_current_with_hysteresis(low, 200, RANGE, 120, 5),
            CurrentLevel::High,
            "escalation is never held back"
        );
    }

    #[test]
    fn stressed_holds_near_the_stress_boundary() {
        let stressed = CurrentLevel::Stressed;
        assert_eq!(
            classify_current_with_hysteresis(stressed, 90, RANGE, 120, 5),
            CurrentLevel::Stressed
        );
        assert_eq!(
            classify_current_with_hysteresis(stressed, 88, RANGE, 120, 5),
            CurrentLevel::Normal
        );
        assert_eq!(
            classify_current_with_hysteresis(stressed, 121, RANGE, 120, 5),
            CurrentLevel::High
        );
    }

    #[test]
    fn zero_margin_matches_plain_classification() {
        for reading in [5, 10, 93, 94, 120, 121] {
            for previous in [
                CurrentLevel::Normal,
                CurrentLevel::Stressed,
                CurrentLevel::Low,
                CurrentLevel::High,
            ] {
                assert_eq!(
                    classify_current_with_hysteresis(previous, reading, RANGE, 120, 0),
                    classify_current(reading, RANGE, 120),
                    "reading {reading} from {previous:?}"
                );
            }
        }
    }

    #[test]
    fn overrides_compose() {
        let policy = SupervisorPolicy::DEFAULT
            .with_boot_loop_threshold(5)
            .with_stop_message_interval(Duration::from_secs(2));
        assert_eq!(policy.boot_loop_threshold, 5);
        assert_eq!(policy.warning_reset_count, 2);
        assert_eq!(policy.stop_message_interval, Duration::from_secs(2));
        assert_eq!(policy.current_hysteresis, 5);
        assert_eq!(policy.with_current_hysteresis(0).current_hysteresis, 0);
    }
}
