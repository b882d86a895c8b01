//! Persistent configuration record
//!
//! Every calibration parameter lives in [`Config`]. On storage each copy is
//! 24 little-endian 16-bit words, the CRC word last.

use super::checksum::Crc16;
use super::params::{self, defaults};

/// Words in one serialized record.
pub const CONFIG_WORDS: usize = 24;

/// Bytes in one serialized record.
pub const CONFIG_RECORD_LEN: usize = CONFIG_WORDS * 2;

/// Spare words reserved for future fields.
pub const CONFIG_SPARES: usize = 5;

/// Calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Must equal [`params::CONFIG_MAGIC`].
    pub magic: u16,

    // === PI loop ===
    /// Proportional gain
    pub kp: i16,
    /// Integral gain
    pub ki: i16,

    // === Throttle ===
    /// Raw counts with the pedal to the metal
    pub throttle_min_raw_counts: u16,
    /// Raw counts with the foot off the pedal
    pub throttle_max_raw_counts: u16,
    /// Raw counts at/below which the throttle is considered broken
    pub throttle_fault_raw_counts: u16,
    /// Gain on pedal position (x/8)
    pub throttle_pos_gain: u16,
    /// Gain on filtered PWM, i.e. motor voltage (x/8)
    pub throttle_pwm_gain: u16,
    /// Current reference slew per millisecond
    pub current_ramp_rate: i16,

    // === Telemetry ===
    /// Real-time data period [ms], 0 disables
    pub rtd_period: u16,
    /// Duty low pass filter selector (0..=3)
    pub pwm_filter: u16,

    // === Motor overspeed ===
    /// Overspeed threshold, 0 disables detection
    pub motor_os_threshold: u16,
    /// Fault hold time [ms]
    pub motor_os_fault_time: u16,
    /// Detect (debounce) time [ms]
    pub motor_os_detect_time: u16,
    /// PWM counts before the FETs start to conduct
    pub pwm_deadzone: u16,

    // === Battery / contactor ===
    /// Battery amps limit, 0 disables
    pub battery_amps_limit: u16,
    /// Precharge time [0.1s], 0 disables
    pub precharge_time: u16,
    /// Feedback must exceed this to divide by it in the speed estimate
    pub motor_speed_calc_amps: u16,

    pub spares: [u16; CONFIG_SPARES],

    /// CRC-16 over every preceding byte.
    pub crc: u16,
}

impl Config {
    /// Compiled-in defaults. The CRC is left at zero until the record is saved.
    pub const fn new() -> Self {
        Self {
            magic: params::CONFIG_MAGIC,
            kp: defaults::KP,
            ki: defaults::KI,
            throttle_min_raw_counts: defaults::THROTTLE_MIN_RAW_COUNTS,
            throttle_max_raw_counts: defaults::THROTTLE_MAX_RAW_COUNTS,
            throttle_fault_raw_counts: defaults::THROTTLE_FAULT_RAW_COUNTS,
            throttle_pos_gain: defaults::THROTTLE_POS_GAIN,
            throttle_pwm_gain: defaults::THROTTLE_PWM_GAIN,
            current_ramp_rate: defaults::CURRENT_RAMP_RATE,
            rtd_period: defaults::RTD_PERIOD,
            pwm_filter: defaults::PWM_FILTER,
            motor_os_threshold: defaults::MOTOR_OS_THRESHOLD,
            motor_os_fault_time: defaults::MOTOR_OS_FAULT_TIME,
            motor_os_detect_time: defaults::MOTOR_OS_DETECT_TIME,
            pwm_deadzone: defaults::PWM_DEADZONE,
            battery_amps_limit: defaults::BATTERY_AMPS_LIMIT,
            precharge_time: defaults::PRECHARGE_TIME,
            motor_speed_calc_amps: defaults::MOTOR_SPEED_CALC_AMPS,
            spares: [0; CONFIG_SPARES],
            crc: 0,
        }
    }

    fn to_words(&self) -> [u16; CONFIG_WORDS] {
        let s = &self.spares;
        [
            self.magic,
            self.kp as u16,
            self.ki as u16,
            self.throttle_min_raw_counts,
            self.throttle_max_raw_counts,
            self.throttle_fault_raw_counts,
            self.throttle_pos_gain,
            self.throttle_pwm_gain,
            self.current_ramp_rate as u16,
            self.rtd_period,
            self.pwm_filter,
            self.motor_os_threshold,
            self.motor_os_fault_time,
            self.motor_os_detect_time,
            self.pwm_deadzone,
            self.battery_amps_limit,
            self.precharge_time,
            self.motor_speed_calc_amps,
            s[0],
            s[1],
            s[2],
            s[3],
            s[4],
            self.crc,
        ]
    }

    fn from_words(w: &[u16; CONFIG_WORDS]) -> Self {
        Self {
            magic: w[0],
            kp: w[1] as i16,
            ki: w[2] as i16,
            throttle_min_raw_counts: w[3],
            throttle_max_raw_counts: w[4],
            throttle_fault_raw_counts: w[5],
            throttle_pos_gain: w[6],
            throttle_pwm_gain: w[7],
            current_ramp_rate: w[8] as i16,
            rtd_period: w[9],
            pwm_filter: w[10],
            motor_os_threshold: w[11],
            motor_os_fault_time: w[12],
            motor_os_detect_time: w[13],
            pwm_deadzone: w[14],
            battery_amps_limit: w[15],
            precharge_time: w[16],
            motor_speed_calc_amps: w[17],
            spares: [w[18], w[19], w[20], w[21], w[22]],
            crc: w[23],
        }
    }

    /// Serialize to the on-storage layout.
    pub fn to_bytes(&self) -> [u8; CONFIG_RECORD_LEN] {
        let mut bytes = [0u8; CONFIG_RECORD_LEN];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(self.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Deserialize from the on-storage layout. No validation happens here.
    pub fn from_bytes(bytes: &[u8; CONFIG_RECORD_LEN]) -> Self {
        let mut words = [0u16; CONFIG_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self::from_words(&words)
    }

    /// CRC over every field except the CRC word itself.
    pub fn calculate_crc(&self, crc: &mut impl Crc16) -> u16 {
        let bytes = self.to_bytes();
        crc.checksum(&bytes[..CONFIG_RECORD_LEN - 2])
    }

    /// Recompute and store the CRC word.
    pub fn seal(&mut self, crc: &mut impl Crc16) {
        self.crc = self.calculate_crc(crc);
    }

    pub fn validate_header(&self) -> bool {
        self.magic == params::CONFIG_MAGIC
    }

    /// Magic and CRC both match.
    pub fn is_valid(&self, crc: &mut impl Crc16) -> bool {
        self.validate_header() && self.calculate_crc(crc) == self.crc
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
