//! Fixed-point PI current regulator
//!
//! Velocity-form recurrence on a Q16 duty accumulator:
//!
//! ```text
//! duty += K1 * e[n] + K2 * e[n-1]      K1 = Kp << 10, K2 = Ki - K1
//! ```
//!
//! Runs once per current-feedback conversion (4kHz).

use crate::config::params::{VREF_FAULT_FLOOR, VREF_NOMINAL, VREF_SAMPLES, VREF_TOLERANCE};
use crate::fmt::*;
use crate::hardware::{AnalogChannel, PowerStage};

/// Fractional bits of the duty accumulator.
pub const DUTY_FRAC_BITS: u32 = 16;

/// Largest duty the loop will command.
pub const DUTY_MAX: u16 = 510;

/// Accumulator ceiling, `DUTY_MAX` in Q16.
pub const ACCUMULATOR_MAX: i32 = (DUTY_MAX as i32) << DUTY_FRAC_BITS;

/// Feedback scale factor 19/8 (about 2.4), maps the sensor span onto 0..=511.
const FEEDBACK_SCALE_MUL: u32 = 19;
const FEEDBACK_SCALE_SHIFT: u32 = 3;

/// Shift applied to Kp when deriving K1.
const KP_SHIFT: u32 = 10;

/// Recurrence coefficients derived from the configured gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PiGains {
    pub k1: i32,
    pub k2: i32,
}

impl PiGains {
    pub const fn from_config(kp: i16, ki: i16) -> Self {
        let k1 = (kp as i32) << KP_SHIFT;
        Self {
            k1,
            k2: ki as i32 - k1,
        }
    }
}

/// Result of one regulator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegulatorOutput {
    /// Offset-corrected, scaled current feedback (0..=511 nominal)
    pub feedback: i16,
    /// Commanded duty (0..=510)
    pub duty: u16,
    /// Raw feedback below the sensor reference floor
    pub sense_fault: bool,
}

/// PI recurrence state.
#[derive(Debug, Clone)]
pub struct Regulator {
    /// Zero-current sensor reading measured at startup
    zero_offset: u16,
    error_old: i32,
    accumulator: i32,
}

impl Regulator {
    pub const fn new(zero_offset: u16) -> Self {
        Self {
            zero_offset,
            error_old: 0,
            accumulator: 0,
        }
    }

    pub fn zero_offset(&self) -> u16 {
        self.zero_offset
    }

    /// Q16 duty accumulator.
    pub fn accumulator(&self) -> i32 {
        self.accumulator
    }

    /// Raw sensor counts to the 0..=511 reference scale.
    pub fn scale_feedback(&self, raw: u16) -> i16 {
        let above_zero = raw.saturating_sub(self.zero_offset) as u32;
        ((above_zero * FEEDBACK_SCALE_MUL) >> FEEDBACK_SCALE_SHIFT) as i16
    }

    /// Run one step of the loop.
    ///
    /// # Arguments
    /// * `raw_feedback` - current sensor conversion (10-bit counts)
    /// * `reference` - current reference (0..=511)
    /// * `gains` - derived coefficients
    pub fn step(&mut self, raw_feedback: u16, reference: i16, gains: PiGains) -> RegulatorOutput {
        let sense_fault = raw_feedback < VREF_FAULT_FLOOR;
        let feedback = self.scale_feedback(raw_feedback);
        let error_new = reference as i32 - feedback as i32;

        let next = if reference == 0 {
            // zero reference: duty straight to zero, carried errors ignored
            0
        } else {
            self.accumulator as i64
                + gains.k1 as i64 * error_new as i64
                + gains.k2 as i64 * self.error_old as i64
        };
        self.error_old = error_new;
        self.accumulator = next.clamp(0, ACCUMULATOR_MAX as i64) as i32;

        RegulatorOutput {
            feedback,
            duty: Self::round_duty(self.accumulator),
            sense_fault,
        }
    }

    /// Integer part of the accumulator, rounded up on the half bit.
    fn round_duty(accumulator: i32) -> u16 {
        let whole = (accumulator >> DUTY_FRAC_BITS) as u16;
        if accumulator & (1 << (DUTY_FRAC_BITS - 1)) != 0 {
            whole + 1
        } else {
            whole
        }
    }
}

/// PWM compare register value for a duty.
#[inline]
pub const fn duty_register(duty: u16) -> u16 {
    if cfg!(feature = "pwm-8k") {
        duty << 1
    } else {
        duty
    }
}

/// Exponential low pass filter of the commanded duty.
///
/// Selector 0..=3 picks a weight of 127/128, 63/64, 31/32 or 15/16 on the
/// previous value; anything else holds the filter at zero.
#[derive(Debug, Clone, Default)]
pub struct DutyFilter {
    /// Q16 filtered duty
    sum: u32,
}

impl DutyFilter {
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    /// Filter one duty sample.
    ///
    /// # Returns
    /// The integer part of the filtered duty.
    pub fn update(&mut self, duty: u16, selector: u16) -> u16 {
        let input = (duty as u64) << DUTY_FRAC_BITS;
        let sum = self.sum as u64;
        self.sum = match selector {
            0 => (sum * 127 + input) >> 7,
            1 => (sum * 63 + input) >> 6,
            2 => (sum * 31 + input) >> 5,
            3 => (sum * 15 + input) >> 4,
            _ => 0,
        } as u32;
        self.value()
    }

    pub fn value(&self) -> u16 {
        (self.sum >> DUTY_FRAC_BITS) as u16
    }
}

/// Zero-current reference outside 512 +/- 50 counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VrefError {
    /// The measured reference, still used as the offset.
    OutOfRange(u16),
}

impl VrefError {
    pub fn measured(self) -> u16 {
        match self {
            VrefError::OutOfRange(v) => v,
        }
    }
}

/// Measure the current sensor's zero-current output.
///
/// Averages 16 blocking conversions. Must run with the motor unpowered.
pub fn calibrate_zero_offset(stage: &mut impl PowerStage) -> Result<u16, VrefError> {
    let sum: u32 = (0..VREF_SAMPLES)
        .map(|_| stage.convert_blocking(AnalogChannel::CurrentFeedback) as u32)
        .sum();
    let vref = (sum / VREF_SAMPLES as u32) as u16;

    if vref.abs_diff(VREF_NOMINAL) > VREF_TOLERANCE {
        error!("Zero-current reference out of range: {} counts", vref);
        return Err(VrefError::OutOfRange(vref));
    }
    info!("Zero-current reference: {} counts", vref);
    Ok(vref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::ScriptedStage;

    const GAINS: PiGains = PiGains::from_config(2, 160);

    #[test]
    fn test_gain_derivation() {
        assert_eq!(GAINS.k1, 2048);
        assert_eq!(GAINS.k2, 160 - 2048);
    }

    #[test]
    fn test_feedback_offset_and_scale() {
        let reg = Regulator::new(512);
        assert_eq!(reg.scale_feedback(400), 0);
        assert_eq!(reg.scale_feedback(512), 0);
        assert_eq!(reg.scale_feedback(520), 19);
        assert_eq!(reg.scale_feedback(725), 505);
    }

    #[test]
    fn test_first_step_is_proportional() {
        let mut reg = Regulator::new(512);
        let out = reg.step(512, 100, GAINS);
        assert_eq!(out.feedback, 0);
        assert_eq!(reg.accumulator(), 2048 * 100);
        // 204800 / 65536 = 3.125 -> 3
        assert_eq!(out.duty, 3);
        assert!(!out.sense_fault);
    }

    #[test]
    fn test_half_bit_rounds_up() {
        assert_eq!(Regulator::round_duty(0x0003_8000), 4);
        assert_eq!(Regulator::round_duty(0x0003_7fff), 3);
        assert_eq!(Regulator::round_duty(ACCUMULATOR_MAX), DUTY_MAX);
    }

    #[test]
    fn test_zero_reference_forces_accumulator_to_zero() {
        let mut reg = Regulator::new(512);
        for _ in 0..50 {
            reg.step(512, 400, GAINS);
        }
        assert!(reg.accumulator() > 0);
        let out = reg.step(512, 0, GAINS);
        assert_eq!(reg.accumulator(), 0);
        assert_eq!(out.duty, 0);
    }

    #[test]
    fn test_accumulator_stays_bounded_for_any_error_sequence() {
        let gains = PiGains::from_config(500, 500);
        let mut reg = Regulator::new(0);
        // deterministic pseudo-random references and feedbacks
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..5000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let reference = ((seed >> 8) % 512) as i16;
            let raw = ((seed >> 20) % 1024) as u16;
            let out = reg.step(raw, reference, gains);
            assert!((0..=ACCUMULATOR_MAX).contains(&reg.accumulator()));
            assert!(out.duty <= DUTY_MAX);
        }
    }

    #[test]
    fn test_saturates_at_both_rails() {
        let mut reg = Regulator::new(512);
        for _ in 0..10 {
            reg.step(512, 511, PiGains::from_config(500, 500));
        }
        assert_eq!(reg.accumulator(), ACCUMULATOR_MAX);
        // large negative error drives it to the floor, never below
        for _ in 0..10 {
            reg.step(1023, 1, PiGains::from_config(500, 500));
        }
        assert_eq!(reg.accumulator(), 0);
    }

    #[test]
    fn test_sense_fault_below_floor() {
        let mut reg = Regulator::new(512);
        assert!(reg.step(409, 0, GAINS).sense_fault);
        assert!(!reg.step(410, 0, GAINS).sense_fault);
    }

    #[test]
    fn test_filter_converges_and_resets() {
        let mut filter = DutyFilter::new();
        for _ in 0..200 {
            filter.update(400, 3);
        }
        assert!(filter.value() >= 398 && filter.value() <= 400);
        assert_eq!(filter.update(400, 4), 0);
        assert_eq!(filter.value(), 0);
    }

    #[test]
    fn test_filter_time_constants_ordered() {
        let mut slow = DutyFilter::new();
        let mut fast = DutyFilter::new();
        for _ in 0..64 {
            slow.update(500, 0);
            fast.update(500, 2);
        }
        assert!(fast.value() > slow.value());
    }

    #[test]
    fn test_zero_offset_calibration() {
        let mut stage = ScriptedStage::new(683, 500, 530);
        assert_eq!(calibrate_zero_offset(&mut stage), Ok(530));
        stage.current = 600;
        assert_eq!(calibrate_zero_offset(&mut stage), Err(VrefError::OutOfRange(600)));
    }
}
