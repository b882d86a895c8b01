//! Realtime snapshot for thread-mode consumers
//!
//! Fields are copied one at a time, each under its own critical section,
//! with a short settle delay between them so a pending interrupt gets in.
//! The result is not consistent across fields and is not meant to be.

use crate::control::energy::AmpHourCounter;
use crate::state::SharedState;

/// Spin iterations between field copies.
const SETTLE_SPINS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RealtimeSnapshot {
    pub throttle_ref: i16,
    pub current_ref: i16,
    pub current_fb: i16,
    pub raw_heatsink: u16,
    pub raw_throttle: u16,
    pub battery_amps: u16,
    pub battery_ah: AmpHourCounter,
}

#[inline(always)]
fn settle() {
    for _ in 0..SETTLE_SPINS {
        core::hint::spin_loop();
    }
}

impl RealtimeSnapshot {
    pub fn capture(shared: &SharedState) -> Self {
        let throttle_ref = shared.throttle_ref.get();
        settle();
        let current_ref = shared.current_ref.get();
        settle();
        let current_fb = shared.current_fb.get();
        settle();
        let raw_heatsink = shared.raw_heatsink.get();
        settle();
        let raw_throttle = shared.raw_throttle.get();
        settle();
        let battery_amps = shared.battery_amps.get();
        settle();
        let battery_ah = shared.battery_ah.get();
        settle();

        Self {
            throttle_ref,
            current_ref,
            current_fb,
            raw_heatsink,
            raw_throttle,
            battery_amps,
            battery_ah,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_copies_each_field() {
        let shared = SharedState::new();
        shared.throttle_ref.set(12);
        shared.current_ref.set(34);
        shared.current_fb.set(56);
        shared.raw_heatsink.set(700);
        shared.raw_throttle.set(450);
        shared.battery_amps.set(99);
        shared.battery_ah.set(AmpHourCounter::from_raw(123_456));

        let snap = RealtimeSnapshot::capture(&shared);
        assert_eq!(snap.throttle_ref, 12);
        assert_eq!(snap.current_ref, 34);
        assert_eq!(snap.current_fb, 56);
        assert_eq!(snap.raw_heatsink, 700);
        assert_eq!(snap.raw_throttle, 450);
        assert_eq!(snap.battery_amps, 99);
        assert_eq!(snap.battery_ah.raw(), 123_456);
    }
}
