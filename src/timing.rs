//! Millisecond time base and idle measurement
//!
//! The millisecond counter is 16 bits and wraps silently; all durations are
//! taken with wrapping subtraction so they stay correct across the wrap.

use crate::state::SharedState;

/// Source of the free-running millisecond counter.
pub trait MillisClock {
    fn now_ms(&self) -> u16;

    /// Milliseconds since `since`.
    fn elapsed_since(&self, since: u16) -> u16 {
        elapsed(since, self.now_ms())
    }
}

impl MillisClock for SharedState {
    fn now_ms(&self) -> u16 {
        self.millis.get()
    }
}

impl<C: MillisClock + ?Sized> MillisClock for &C {
    fn now_ms(&self) -> u16 {
        (**self).now_ms()
    }
}

pub const fn elapsed(since: u16, now: u16) -> u16 {
    now.wrapping_sub(since)
}

/// Busy-wait for `window_ms` and count the loop iterations.
pub fn spin_count(clock: &impl MillisClock, window_ms: u16) -> u32 {
    let begin = clock.now_ms();
    let mut count: u32 = 0;
    while clock.elapsed_since(begin) < window_ms {
        count = count.wrapping_add(1);
        core::hint::spin_loop();
    }
    count
}

/// Idle ratio relative to a baseline taken before the control loop starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdleMeter {
    baseline: u32,
}

impl IdleMeter {
    pub const fn from_baseline(baseline: u32) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> u32 {
        self.baseline
    }

    /// Spin for one window and record the loop count as the 100% mark.
    pub fn calibrate(clock: &impl MillisClock, window_ms: u16) -> Self {
        Self::from_baseline(spin_count(clock, window_ms))
    }

    /// `measured` as a percentage of the baseline.
    pub fn percent(&self, measured: u32) -> u16 {
        if self.baseline == 0 {
            return 0;
        }
        (measured as u64 * 100 / self.baseline as u64).min(u16::MAX as u64) as u16
    }

    /// Spin for one window and report the percentage.
    pub fn measure(&self, clock: &impl MillisClock, window_ms: u16) -> u16 {
        self.percent(spin_count(clock, window_ms))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::SteppingClock;
    use super::*;

    #[test]
    fn test_elapsed_across_wrap() {
        assert_eq!(elapsed(65530, 4), 10);
        assert_eq!(elapsed(100, 100), 0);
    }

    #[test]
    fn test_spin_count_scales_with_load() {
        let idle = SteppingClock::new(65500, 10);
        let busy = SteppingClock::new(0, 5);
        let baseline = spin_count(&idle, 100);
        let loaded = spin_count(&busy, 100);
        assert!(baseline > 900 && baseline <= 1000);
        assert!(loaded < baseline);
    }

    #[test]
    fn test_idle_percent() {
        let meter = IdleMeter::from_baseline(2000);
        assert_eq!(meter.percent(2000), 100);
        assert_eq!(meter.percent(1500), 75);
        assert_eq!(IdleMeter::from_baseline(0).percent(10), 0);
    }

    #[test]
    fn test_measure_against_calibrated_baseline() {
        let meter = IdleMeter::calibrate(&SteppingClock::new(0, 8), 100);
        let percent = meter.measure(&SteppingClock::new(0, 4), 100);
        assert!((45..=55).contains(&percent));
    }
}
