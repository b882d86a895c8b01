//! Throttle to current reference shaping
//!
//! Two of the four 1kHz sub-tasks. Step 1 turns raw pedal counts into a
//! 0..=511 throttle reference and debounces the throttle-fault condition.
//! Step 2 ramps the current reference toward the gain-weighted throttle
//! target, applies the thermal and battery-current ceilings, and zeroes it on
//! any fault.

use crate::config::params::{MAX_CURRENT_REF, THROTTLE_FAULT_COUNTS};
use crate::config::Config;
use crate::fmt::*;

/// Weighting shift shared by the position and PWM gains.
const GAIN_SHIFT: u32 = 3;

/// Outcome of a throttle validity pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThrottleStep {
    /// Pedal reading valid, new throttle reference.
    Reference(i16),
    /// Reading at/below the fault level, reference left untouched.
    Suspect,
    /// Debounce just reached its bound; latch the throttle fault.
    FaultLatched,
}

/// Pedal position to throttle reference, pedal counts inverted.
///
/// A degenerate span (`min >= max`) maps every reading to zero.
pub fn throttle_reference(raw: u16, min: u16, max: u16) -> i16 {
    if min >= max {
        return 0;
    }
    let span = (max - min) as u32;
    let pressed = span - (raw.clamp(min, max) - min) as u32;
    (pressed * MAX_CURRENT_REF as u32 / span) as i16
}

/// Throttle validity state (step 1).
#[derive(Debug, Clone, Default)]
pub struct ThrottleMonitor {
    fault_counts: u16,
}

impl ThrottleMonitor {
    pub const fn new() -> Self {
        Self { fault_counts: 0 }
    }

    pub fn fault_counts(&self) -> u16 {
        self.fault_counts
    }

    pub fn step(&mut self, raw: u16, config: &Config) -> ThrottleStep {
        if raw > config.throttle_fault_raw_counts {
            self.fault_counts = self.fault_counts.saturating_sub(1);
            return ThrottleStep::Reference(throttle_reference(
                raw,
                config.throttle_min_raw_counts,
                config.throttle_max_raw_counts,
            ));
        }

        if self.fault_counts < THROTTLE_FAULT_COUNTS {
            self.fault_counts += 1;
            if self.fault_counts >= THROTTLE_FAULT_COUNTS {
                error!("Throttle fault: raw={} fault level={}", raw, config.throttle_fault_raw_counts);
                return ThrottleStep::FaultLatched;
            }
        }
        ThrottleStep::Suspect
    }
}

/// Values read by the current reference derivation (step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperInputs {
    pub throttle_ref: i16,
    pub current_ref: i16,
    /// Low-pass filtered duty
    pub duty_lpf: u16,
    /// Thermal ceiling
    pub max_current_ref: u16,
    /// `battery_amps_limit * 510`, zero when unlimited
    pub battery_limit: u32,
    pub faulted: bool,
}

/// Gain-weighted throttle target, floored at zero.
pub fn current_target(throttle_ref: i16, duty_lpf: u16, config: &Config) -> u16 {
    let position = (throttle_ref.max(0) as u32 * config.throttle_pos_gain as u32) >> GAIN_SHIFT;
    let pwm = (duty_lpf as u32 * config.throttle_pwm_gain as u32) >> GAIN_SHIFT;
    position.saturating_sub(pwm).min(u16::MAX as u32) as u16
}

/// Step 2: next current reference.
pub fn shape_current(inputs: &ShaperInputs, config: &Config) -> i16 {
    if inputs.faulted {
        return 0;
    }

    let target = current_target(inputs.throttle_ref, inputs.duty_lpf, config) as i32;
    let ceiling = inputs.max_current_ref as i32;
    let current = inputs.current_ref as i32;
    let ramp = (config.current_ramp_rate as i32).max(0);

    let delta = if target > ceiling {
        ceiling - current
    } else {
        target - current
    };
    let mut next = current + delta.clamp(-ramp, ramp);

    // Battery current ~ motor current * duty / 510
    if inputs.battery_limit > 0 && inputs.duty_lpf > 0 {
        let limit = inputs.battery_limit / inputs.duty_lpf as u32;
        if limit < MAX_CURRENT_REF as u32 {
            next = next.min(limit as i32);
        }
    }

    next as i16
}
