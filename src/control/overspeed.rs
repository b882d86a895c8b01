//! Motor overspeed estimator
//!
//! A series DC motor's speed is roughly proportional to armature voltage
//! over current. The estimate is `((duty - deadzone) << 16) / feedback`,
//! compared against `threshold << 10`.

use crate::fmt::*;

/// Scale applied to the configured threshold.
const THRESHOLD_SHIFT: u32 = 10;

/// Fixed-point scale of the speed estimate.
const ESTIMATE_SHIFT: u32 = 16;

/// Derived threshold for a configured value.
pub const fn scaled_threshold(motor_os_threshold: u16) -> u32 {
    (motor_os_threshold as u32) << THRESHOLD_SHIFT
}

/// Inputs the estimator needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OverspeedSettings {
    /// `motor_os_threshold << 10`, zero disables the estimator
    pub threshold: u32,
    /// Debounce ticks before latching
    pub detect_time: u16,
    /// Ticks the fault is held once latched
    pub fault_time: u16,
    pub pwm_deadzone: u16,
    pub calc_amps: u16,
}

/// Speed-proportional estimate.
///
/// Below `calc_amps` feedback the divisor is pinned at `calc_amps + 1`, so a
/// high duty at light load still reads as fast.
pub fn estimate(duty: u16, feedback: i16, pwm_deadzone: u16, calc_amps: u16) -> u32 {
    let voltage = (duty.saturating_sub(pwm_deadzone) as u32) << ESTIMATE_SHIFT;
    let feedback = feedback.max(0) as u32;
    if feedback > calc_amps as u32 {
        voltage / feedback
    } else {
        voltage / (calc_amps as u32 + 1)
    }
}

/// Change requested of the motor-overspeed fault bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverspeedEvent {
    Latched,
    Cleared,
}

/// Debounce and fault-hold state.
#[derive(Debug, Clone, Default)]
pub struct OverspeedEstimator {
    detect_count: u16,
    hold_timer: u16,
}

impl OverspeedEstimator {
    pub const fn new() -> Self {
        Self {
            detect_count: 0,
            hold_timer: 0,
        }
    }

    pub fn hold_remaining(&self) -> u16 {
        self.hold_timer
    }

    /// One 1kHz evaluation.
    ///
    /// # Arguments
    /// * `faulted` - overspeed bit currently set in the fault mask
    /// * `duty` - duty input to the estimate
    /// * `feedback` - scaled current feedback
    pub fn step(
        &mut self,
        settings: &OverspeedSettings,
        faulted: bool,
        duty: u16,
        feedback: i16,
    ) -> Option<OverspeedEvent> {
        if settings.threshold == 0 {
            return None;
        }

        if faulted {
            // A zero hold time leaves the fault latched
            if self.hold_timer > 0 {
                self.hold_timer -= 1;
                if self.hold_timer == 0 {
                    info!("Motor overspeed fault expired");
                    return Some(OverspeedEvent::Cleared);
                }
            }
            return None;
        }

        let speed = estimate(duty, feedback, settings.pwm_deadzone, settings.calc_amps);
        if speed <= settings.threshold {
            self.detect_count = 0;
            return None;
        }

        if self.detect_count < settings.detect_time {
            self.detect_count += 1;
            return None;
        }

        error!("Motor overspeed: estimate={} threshold={}", speed, settings.threshold);
        self.detect_count = 0;
        self.hold_timer = settings.fault_time;
        Some(OverspeedEvent::Latched)
    }
}
