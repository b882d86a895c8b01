//! Battery current and amp-hour accounting

use crate::config::params::{AH_TENTHS_DIVISOR, BATTERY_AH_CEILING};

/// Battery amps from motor current and duty, `feedback * duty / 512` rounded.
pub fn battery_amps(feedback: i16, duty: u16) -> u16 {
    let scaled = (feedback.max(0) as u32 * duty as u32) >> 8;
    ((scaled >> 1) + (scaled & 1)) as u16
}

/// Running amp-hour sum, saturating at [`BATTERY_AH_CEILING`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AmpHourCounter {
    sum: u32,
}

impl AmpHourCounter {
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    pub const fn from_raw(sum: u32) -> Self {
        Self { sum }
    }

    pub const fn raw(&self) -> u32 {
        self.sum
    }

    pub fn accumulate(&mut self, amps: u16) {
        self.sum = self.sum.saturating_add(amps as u32).min(BATTERY_AH_CEILING);
    }

    /// Consumed charge in 0.1Ah, capped at 999.9Ah.
    pub fn tenths(&self) -> u16 {
        (self.sum / AH_TENTHS_DIVISOR).min(9999) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_amps_rounding() {
        // 505 counts at full duty
        assert_eq!(battery_amps(505, 510), 503);
        assert_eq!(battery_amps(1, 256), 1);
        assert_eq!(battery_amps(1, 255), 0);
        assert_eq!(battery_amps(-20, 510), 0);
        assert_eq!(battery_amps(100, 0), 0);
    }

    #[test]
    fn test_clamps_at_ceiling() {
        let mut ah = AmpHourCounter::from_raw(BATTERY_AH_CEILING - 100);
        ah.accumulate(60);
        assert_eq!(ah.raw(), BATTERY_AH_CEILING - 40);
        for _ in 0..10 {
            let before = ah.raw();
            ah.accumulate(503);
            assert!(ah.raw() >= before);
        }
        assert_eq!(ah.raw(), BATTERY_AH_CEILING);
    }

    #[test]
    fn test_tenths() {
        assert_eq!(AmpHourCounter::from_raw(AH_TENTHS_DIVISOR - 1).tenths(), 0);
        assert_eq!(AmpHourCounter::from_raw(AH_TENTHS_DIVISOR * 25).tenths(), 25);
        assert_eq!(AmpHourCounter::from_raw(BATTERY_AH_CEILING).tenths(), 9999);
    }
}
