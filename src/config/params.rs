//! Calibration constants fixed at build time

/// Record sentinel ("magic") stored in the first word of every copy.
pub const CONFIG_MAGIC: u16 = 0x12ab;

/// Number of redundant copies kept in non-volatile storage.
pub const CONFIG_COPIES: usize = 4;

/// Byte offset of the first copy.
pub const CONFIG_BASE_ADDRESS: u32 = 0;

/// Largest current reference fed to the PI loop.
pub const MAX_CURRENT_REF: u16 = 511;

/// Milliseconds the throttle must read at/below its fault level before it latches.
pub const THROTTLE_FAULT_COUNTS: u16 = 200;

/// Throttle reference at or below which the high pedal lockout releases.
pub const HPL_THROTTLE_THRESHOLD: i16 = 2;

/// Raw current feedback below this (about 2V) means the sensor reference is gone.
pub const VREF_FAULT_FLOOR: u16 = 410;

/// Nominal zero-current sensor reading and accepted deviation at startup.
pub const VREF_NOMINAL: u16 = 512;
pub const VREF_TOLERANCE: u16 = 50;

/// Conversions averaged when measuring the zero-current reference.
pub const VREF_SAMPLES: u16 = 16;

/// Over-current trips counted before the latch is pulsed clear.
pub const NUM_OC_CYCLES_OFF: u8 = 4;

/// Heatsink reading where thermal cutback starts (about 75 degC).
pub const THERMAL_CUTBACK_START: u16 = 670;

/// Heatsink counts per cutback step (eighths of full current).
pub const THERMAL_STEP_COUNTS: u16 = 8;

/// Battery amp-hour accumulator ceiling.
pub const BATTERY_AH_CEILING: u32 = 4_000_000_000;

/// Accumulator counts per 0.1Ah (the sum runs at 976.5625Hz).
pub const AH_TENTHS_DIVISOR: u32 = 351_562;

/// Precharge extra delay, 0.1s units; the contactor closes for this long before release.
pub const PRECHARGE_CONTACTOR_LEAD: u16 = 5;

/// Housekeeping slow pass period [ms].
pub const HOUSEKEEPING_PERIOD_MS: u16 = 100;

/// Window used for the idle-ratio measurement [ms].
pub const IDLE_WINDOW_MS: u16 = 100;

/// Firmware banner.
#[cfg(not(feature = "pwm-8k"))]
pub const BANNER: &str = "Cougar OS controller firmware v1.11b\r\n";
#[cfg(feature = "pwm-8k")]
pub const BANNER: &str = "Cougar OS controller firmware v1.11b (8KPWM)\r\n";

/// Default calibration values.
pub mod defaults {
    pub const KP: i16 = 2;
    pub const KI: i16 = 160;
    /// Pedal to metal.
    pub const THROTTLE_MIN_RAW_COUNTS: u16 = 413;
    /// Foot off pedal.
    pub const THROTTLE_MAX_RAW_COUNTS: u16 = 683;
    pub const THROTTLE_FAULT_RAW_COUNTS: u16 = 100;
    pub const THROTTLE_POS_GAIN: u16 = 8;
    pub const THROTTLE_PWM_GAIN: u16 = 0;
    pub const CURRENT_RAMP_RATE: i16 = 6;
    pub const RTD_PERIOD: u16 = 0;
    pub const PWM_FILTER: u16 = 0;
    pub const MOTOR_OS_THRESHOLD: u16 = 0;
    pub const MOTOR_OS_FAULT_TIME: u16 = 1000;
    pub const MOTOR_OS_DETECT_TIME: u16 = 10;
    pub const PWM_DEADZONE: u16 = 5;
    pub const BATTERY_AMPS_LIMIT: u16 = 0;
    pub const PRECHARGE_TIME: u16 = 0;
    pub const MOTOR_SPEED_CALC_AMPS: u16 = 0;
}

/// Upper bounds accepted by the console for each field.
pub mod limits {
    pub const GAIN_MAX: u16 = 500;
    pub const RAW_COUNTS_MAX: u16 = 1023;
    pub const THROTTLE_GAIN_MAX: u16 = 128;
    pub const RAMP_RATE_MAX: u16 = 100;
    pub const RTD_PERIOD_MAX: u16 = 32_000;
    pub const PWM_FILTER_MAX: u16 = 3;
    pub const MOTOR_OS_MAX: u16 = 9_999;
    pub const MOTOR_OS_DT_MAX: u16 = 99;
    pub const PWM_DEADZONE_MAX: u16 = 99;
    pub const AMPS_MAX: u16 = super::MAX_CURRENT_REF;
    pub const PRECHARGE_TIME_MAX: u16 = 999;
}
