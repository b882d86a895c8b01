//! Fault supervisor
//!
//! Five independent latches packed in one byte. Bit positions are part of
//! the telemetry format and must not move.
//!
//! | bit | fault | set by | cleared by |
//! |---|---|---|---|
//! | 0 | throttle | shaper, 200ms at/below fault counts | never |
//! | 1 | sense reference | regulator, feedback < 410 counts; startup calibration | never |
//! | 5 | precharge wait | boot, when precharge is configured | housekeeping, countdown done |
//! | 6 | motor overspeed | overspeed estimator | overspeed estimator, hold time done |
//! | 7 | high pedal lockout | boot | housekeeping, pedal released |

use crate::config::params::{HPL_THROTTLE_THRESHOLD, PRECHARGE_CONTACTOR_LEAD};
use crate::fmt::*;

/// One fault condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    Throttle,
    SenseReference,
    PrechargeWait,
    MotorOverspeed,
    HighPedalLockout,
}

impl Fault {
    pub const ALL: [Fault; 5] = [
        Fault::Throttle,
        Fault::SenseReference,
        Fault::PrechargeWait,
        Fault::MotorOverspeed,
        Fault::HighPedalLockout,
    ];

    pub const fn bit(self) -> u8 {
        match self {
            Fault::Throttle => 1 << 0,
            Fault::SenseReference => 1 << 1,
            Fault::PrechargeWait => 1 << 5,
            Fault::MotorOverspeed => 1 << 6,
            Fault::HighPedalLockout => 1 << 7,
        }
    }
}

/// Active fault set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultMask(u8);

impl FaultMask {
    pub const NONE: FaultMask = FaultMask(0);

    /// Mask at power-up: high pedal lockout always, precharge wait when configured.
    pub const fn at_boot(precharge_configured: bool) -> Self {
        let mut bits = Fault::HighPedalLockout.bit();
        if precharge_configured {
            bits |= Fault::PrechargeWait.bit();
        }
        FaultMask(bits)
    }

    pub const fn from_bits(bits: u8) -> Self {
        FaultMask(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, fault: Fault) -> bool {
        self.0 & fault.bit() != 0
    }

    pub const fn is_clear(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn with(self, fault: Fault) -> Self {
        FaultMask(self.0 | fault.bit())
    }

    #[must_use]
    pub const fn without(self, fault: Fault) -> Self {
        FaultMask(self.0 & !fault.bit())
    }
}

/// Precharge countdown in housekeeping slow-pass units (100ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PrechargeTimer {
    remaining: u16,
}

/// What one precharge step asks of the outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrechargeStep {
    /// Still charging through the resistor.
    Charging,
    /// Close the contactor, power still held off.
    CloseContactor,
    /// Countdown finished, release the precharge-wait fault.
    Release,
}

impl PrechargeTimer {
    /// Countdown for a configured precharge time (0.1s units).
    pub const fn new(precharge_time: u16) -> Self {
        Self {
            remaining: precharge_time.saturating_add(PRECHARGE_CONTACTOR_LEAD),
        }
    }

    pub const fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Advance by one 100ms slow pass.
    pub fn step(&mut self) -> PrechargeStep {
        if self.remaining == 0 {
            return PrechargeStep::Release;
        }
        let close = self.remaining <= PRECHARGE_CONTACTOR_LEAD;
        self.remaining -= 1;
        if close {
            PrechargeStep::CloseContactor
        } else {
            PrechargeStep::Charging
        }
    }
}

/// Pedal-release rule for the high pedal lockout.
pub fn pedal_released(throttle_ref: i16) -> bool {
    throttle_ref <= HPL_THROTTLE_THRESHOLD
}

/// Housekeeping-side fault transitions, run every 100ms while any fault is set.
///
/// # Returns
/// The bits to clear and whether the contactor should close.
pub fn housekeeping_transitions(
    mask: FaultMask,
    throttle_ref: i16,
    precharge: &mut PrechargeTimer,
) -> (FaultMask, bool) {
    let mut clear = FaultMask::NONE;
    let mut close_contactor = false;

    if mask.contains(Fault::HighPedalLockout) && pedal_released(throttle_ref) {
        info!("High pedal lockout released (throttle_ref={})", throttle_ref);
        clear = clear.with(Fault::HighPedalLockout);
    }

    if mask.contains(Fault::PrechargeWait) {
        match precharge.step() {
            PrechargeStep::Release => {
                info!("Precharge complete");
                clear = clear.with(Fault::PrechargeWait);
            }
            PrechargeStep::CloseContactor => close_contactor = true,
            PrechargeStep::Charging => {}
        }
    }

    (clear, close_contactor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        let all = Fault::ALL.iter().fold(0u8, |acc, f| acc | f.bit());
        assert_eq!(all, 0b1110_0011);
    }

    #[test]
    fn test_boot_mask() {
        assert_eq!(FaultMask::at_boot(false).bits(), 0x80);
        assert_eq!(FaultMask::at_boot(true).bits(), 0xa0);
    }

    #[test]
    fn test_with_without_are_independent() {
        let mask = FaultMask::NONE
            .with(Fault::Throttle)
            .with(Fault::MotorOverspeed)
            .without(Fault::Throttle);
        assert!(mask.contains(Fault::MotorOverspeed));
        assert!(!mask.contains(Fault::Throttle));
        assert!(!mask.without(Fault::MotorOverspeed).contains(Fault::MotorOverspeed));
    }

    #[test]
    fn test_precharge_sequence() {
        // 2 tenths configured -> 7 steps, contactor closes for the last 5
        let mut timer = PrechargeTimer::new(2);
        let steps: [PrechargeStep; 8] = core::array::from_fn(|_| timer.step());
        use PrechargeStep::*;
        assert_eq!(
            steps,
            [
                Charging,
                Charging,
                CloseContactor,
                CloseContactor,
                CloseContactor,
                CloseContactor,
                CloseContactor,
                Release
            ]
        );
    }

    #[test]
    fn test_lockout_holds_until_pedal_released() {
        let mask = FaultMask::at_boot(false);
        let mut timer = PrechargeTimer::new(0);
        let (clear, _) = housekeeping_transitions(mask, 3, &mut timer);
        assert!(clear.is_clear());
        let (clear, _) = housekeeping_transitions(mask, 2, &mut timer);
        assert!(clear.contains(Fault::HighPedalLockout));
    }

    #[test]
    fn test_precharge_only_counts_while_waiting() {
        let mut timer = PrechargeTimer::new(10);
        let (_, close) = housekeeping_transitions(FaultMask::at_boot(false), 0, &mut timer);
        assert!(!close);
        assert_eq!(timer.remaining(), 15);
    }
}
