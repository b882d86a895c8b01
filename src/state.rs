//! Controller context shared between the timer interrupt and thread mode
//!
//! One [`SharedState`] lives in a `static` for the life of the firmware.
//! Every field is an independent [`Guarded`] scalar; no access spans two
//! fields.

use crate::config::Config;
use crate::control::energy::AmpHourCounter;
use crate::control::faults::{Fault, FaultMask};
use crate::control::overspeed::{scaled_threshold, OverspeedSettings};
use crate::control::regulator::PiGains;
use crate::sync::{BusyFlag, Guarded};

/// Scale applied to the battery amps limit (full duty in counts).
const BATTERY_LIMIT_SCALE: u32 = 510;

/// Configuration plus every constant derived from it.
///
/// Published to the interrupt as a single value, so a gain change can never
/// be observed half applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tuning {
    pub config: Config,
    pub gains: PiGains,
    pub overspeed: OverspeedSettings,
    /// `battery_amps_limit * 510`
    pub battery_limit: u32,
}

impl Tuning {
    pub const fn derive(config: Config) -> Self {
        Self {
            gains: PiGains::from_config(config.kp, config.ki),
            overspeed: OverspeedSettings {
                threshold: scaled_threshold(config.motor_os_threshold),
                detect_time: config.motor_os_detect_time,
                fault_time: config.motor_os_fault_time,
                pwm_deadzone: config.pwm_deadzone,
                calc_amps: config.motor_speed_calc_amps,
            },
            battery_limit: config.battery_amps_limit as u32 * BATTERY_LIMIT_SCALE,
            config,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::derive(Config::default())
    }
}

/// Live values crossing the interrupt boundary.
pub struct SharedState {
    pub faults: Guarded<FaultMask>,
    pub throttle_ref: Guarded<i16>,
    pub current_ref: Guarded<i16>,
    /// Scaled current feedback
    pub current_fb: Guarded<i16>,
    pub raw_throttle: Guarded<u16>,
    pub raw_heatsink: Guarded<u16>,
    pub raw_current_fb: Guarded<u16>,
    /// Last commanded duty (0..=510)
    pub duty: Guarded<u16>,
    pub battery_amps: Guarded<u16>,
    pub battery_ah: Guarded<AmpHourCounter>,
    /// Thermal ceiling, written by housekeeping. Zero until the first pass.
    pub max_current_ref: Guarded<u16>,
    /// Free-running 1kHz counter (976.5625Hz), wraps at 16 bits
    pub millis: Guarded<u16>,
    pub tuning: Guarded<Tuning>,
    /// Held while the regulator runs
    pub regulator_gate: BusyFlag,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            faults: Guarded::new(FaultMask::NONE),
            throttle_ref: Guarded::new(0),
            current_ref: Guarded::new(0),
            current_fb: Guarded::new(0),
            raw_throttle: Guarded::new(0),
            raw_heatsink: Guarded::new(0),
            raw_current_fb: Guarded::new(0),
            duty: Guarded::new(0),
            battery_amps: Guarded::new(0),
            battery_ah: Guarded::new(AmpHourCounter::new()),
            max_current_ref: Guarded::new(0),
            millis: Guarded::new(0),
            tuning: Guarded::new(Tuning::derive(Config::new())),
            regulator_gate: BusyFlag::new(),
        }
    }

    pub fn raise(&self, fault: Fault) -> FaultMask {
        self.faults.update(|mask| mask.with(fault))
    }

    /// Clear every bit set in `bits`.
    pub fn clear(&self, bits: FaultMask) -> FaultMask {
        self.faults
            .update(|mask| FaultMask::from_bits(mask.bits() & !bits.bits()))
    }

    pub fn config(&self) -> Config {
        self.tuning.get().config
    }

    /// No current demanded and no duty applied, or a fault holding the
    /// output off. Flash programming stalls the control interrupt, so
    /// saving is only allowed in this state.
    pub fn output_quiescent(&self) -> bool {
        !self.faults.get().is_clear() || (self.current_ref.get() == 0 && self.duty.get() == 0)
    }

    /// Re-derive and publish all tuning constants for `config`.
    pub fn publish(&self, config: Config) {
        self.tuning.set(Tuning::derive(config));
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
