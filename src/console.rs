//! Console command set
//!
//! Maps a received command line to a [`Command`], enforcing each field's
//! accepted range, and renders the configuration report lines the console
//! answers with. Byte-level transport lives in the firmware.

use core::fmt::{self, Write};

use heapless::String;

use crate::config::params::limits;
use crate::config::Config;
use crate::telemetry::Fixed;

/// Console command rejected before it had any effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Value outside `0..=max` for the addressed field.
    OutOfRange { value: i32, max: u16 },
    /// Field command without a (numeric) value.
    MissingValue,
    UnknownCommand,
}

/// One writable configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    Kp,
    Ki,
    ThrottleMinRawCounts,
    ThrottleMaxRawCounts,
    ThrottleFaultRawCounts,
    ThrottlePosGain,
    ThrottlePwmGain,
    CurrentRampRate,
    RtdPeriod,
    PwmFilter,
    MotorOsThreshold,
    MotorOsFaultTime,
    MotorOsDetectTime,
    PwmDeadzone,
    MotorSpeedCalcAmps,
    BatteryAmpsLimit,
    PrechargeTime,
}

impl Field {
    pub const ALL: [Field; 17] = [
        Field::Kp,
        Field::Ki,
        Field::ThrottleMinRawCounts,
        Field::ThrottleMaxRawCounts,
        Field::ThrottleFaultRawCounts,
        Field::ThrottlePosGain,
        Field::ThrottlePwmGain,
        Field::CurrentRampRate,
        Field::RtdPeriod,
        Field::PwmFilter,
        Field::MotorOsThreshold,
        Field::MotorOsFaultTime,
        Field::MotorOsDetectTime,
        Field::PwmDeadzone,
        Field::MotorSpeedCalcAmps,
        Field::BatteryAmpsLimit,
        Field::PrechargeTime,
    ];

    /// Console keyword.
    pub const fn keyword(self) -> &'static str {
        match self {
            Field::Kp => "kp",
            Field::Ki => "ki",
            Field::ThrottleMinRawCounts => "t-min-rc",
            Field::ThrottleMaxRawCounts => "t-max-rc",
            Field::ThrottleFaultRawCounts => "t-fault-rc",
            Field::ThrottlePosGain => "t-pos-gain",
            Field::ThrottlePwmGain => "t-pwm-gain",
            Field::CurrentRampRate => "c-rr",
            Field::RtdPeriod => "rtd-period",
            Field::PwmFilter => "pwm-filter",
            Field::MotorOsThreshold => "motor-os-th",
            Field::MotorOsFaultTime => "motor-os-ft",
            Field::MotorOsDetectTime => "motor-os-dt",
            Field::PwmDeadzone => "pwm-deadzone",
            Field::MotorSpeedCalcAmps => "motor-sc-amps",
            Field::BatteryAmpsLimit => "bat-amps-lim",
            Field::PrechargeTime => "pc-time",
        }
    }

    /// Largest accepted value.
    pub const fn max(self) -> u16 {
        match self {
            Field::Kp | Field::Ki => limits::GAIN_MAX,
            Field::ThrottleMinRawCounts
            | Field::ThrottleMaxRawCounts
            | Field::ThrottleFaultRawCounts => limits::RAW_COUNTS_MAX,
            Field::ThrottlePosGain | Field::ThrottlePwmGain => limits::THROTTLE_GAIN_MAX,
            Field::CurrentRampRate => limits::RAMP_RATE_MAX,
            Field::RtdPeriod => limits::RTD_PERIOD_MAX,
            Field::PwmFilter => limits::PWM_FILTER_MAX,
            Field::MotorOsThreshold | Field::MotorOsFaultTime => limits::MOTOR_OS_MAX,
            Field::MotorOsDetectTime => limits::MOTOR_OS_DT_MAX,
            Field::PwmDeadzone => limits::PWM_DEADZONE_MAX,
            Field::MotorSpeedCalcAmps | Field::BatteryAmpsLimit => limits::AMPS_MAX,
            Field::PrechargeTime => limits::PRECHARGE_TIME_MAX,
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.keyword() == keyword)
    }

    /// Store an already range-checked value.
    pub fn apply(self, config: &mut Config, value: u16) {
        match self {
            Field::Kp => config.kp = value as i16,
            Field::Ki => config.ki = value as i16,
            Field::ThrottleMinRawCounts => config.throttle_min_raw_counts = value,
            Field::ThrottleMaxRawCounts => config.throttle_max_raw_counts = value,
            Field::ThrottleFaultRawCounts => config.throttle_fault_raw_counts = value,
            Field::ThrottlePosGain => config.throttle_pos_gain = value,
            Field::ThrottlePwmGain => config.throttle_pwm_gain = value,
            Field::CurrentRampRate => config.current_ramp_rate = value as i16,
            Field::RtdPeriod => config.rtd_period = value,
            Field::PwmFilter => config.pwm_filter = value,
            Field::MotorOsThreshold => config.motor_os_threshold = value,
            Field::MotorOsFaultTime => config.motor_os_fault_time = value,
            Field::MotorOsDetectTime => config.motor_os_detect_time = value,
            Field::PwmDeadzone => config.pwm_deadzone = value,
            Field::MotorSpeedCalcAmps => config.motor_speed_calc_amps = value,
            Field::BatteryAmpsLimit => config.battery_amps_limit = value,
            Field::PrechargeTime => config.precharge_time = value,
        }
    }

    /// Report line showing this field.
    pub const fn report(self) -> Report {
        match self {
            Field::Kp | Field::Ki => Report::Gains,
            Field::ThrottleMinRawCounts | Field::ThrottleMaxRawCounts => Report::ThrottleRange,
            Field::ThrottleFaultRawCounts => Report::ThrottleFault,
            Field::ThrottlePosGain | Field::ThrottlePwmGain => Report::ThrottleGains,
            Field::CurrentRampRate => Report::RampRate,
            Field::RtdPeriod => Report::RtdPeriod,
            Field::PwmFilter => Report::PwmFilter,
            Field::MotorOsThreshold | Field::MotorOsFaultTime => Report::MotorOverspeed,
            Field::MotorOsDetectTime | Field::PwmDeadzone => Report::MotorOverspeedDetect,
            Field::MotorSpeedCalcAmps => Report::SpeedCalcAmps,
            Field::BatteryAmpsLimit => Report::BatteryAmpsLimit,
            Field::PrechargeTime => Report::PrechargeTime,
        }
    }
}

/// One line of the configuration report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Report {
    Gains,
    ThrottleRange,
    ThrottleFault,
    ThrottleGains,
    RampRate,
    RtdPeriod,
    PwmFilter,
    MotorOverspeed,
    MotorOverspeedDetect,
    SpeedCalcAmps,
    BatteryAmpsLimit,
    PrechargeTime,
}

impl Report {
    pub const ALL: [Report; 12] = [
        Report::Gains,
        Report::ThrottleRange,
        Report::ThrottleFault,
        Report::ThrottleGains,
        Report::RampRate,
        Report::RtdPeriod,
        Report::PwmFilter,
        Report::MotorOverspeed,
        Report::MotorOverspeedDetect,
        Report::SpeedCalcAmps,
        Report::BatteryAmpsLimit,
        Report::PrechargeTime,
    ];

    pub fn write_to(self, config: &Config, out: &mut impl Write) -> fmt::Result {
        let d = Fixed::decimal;
        match self {
            Report::Gains => write!(
                out,
                "Kp={} Ki={}",
                d(config.kp as u16, 3),
                d(config.ki as u16, 3)
            ),
            Report::ThrottleRange => write!(
                out,
                "throttle_min_raw_counts={} throttle_max_raw_counts={}",
                d(config.throttle_min_raw_counts, 4),
                d(config.throttle_max_raw_counts, 4)
            ),
            Report::ThrottleFault => write!(
                out,
                "throttle_fault_raw_counts={}",
                d(config.throttle_fault_raw_counts, 4)
            ),
            Report::ThrottleGains => write!(
                out,
                "throttle_pos_gain={} throttle_pwm_gain={}",
                d(config.throttle_pos_gain, 3),
                d(config.throttle_pwm_gain, 3)
            ),
            Report::RampRate => write!(
                out,
                "current_ramp_rate={}",
                d(config.current_ramp_rate as u16, 3)
            ),
            Report::RtdPeriod => write!(out, "rtd_period={}", d(config.rtd_period, 5)),
            Report::PwmFilter => write!(out, "pwm_filter={}", d(config.pwm_filter, 1)),
            Report::MotorOverspeed => write!(
                out,
                "motor_os_threshold={} motor_os_ftime={}",
                d(config.motor_os_threshold, 4),
                d(config.motor_os_fault_time, 4)
            ),
            Report::MotorOverspeedDetect => write!(
                out,
                "motor_os_dtime={} pwm_deadzone={}",
                d(config.motor_os_detect_time, 2),
                d(config.pwm_deadzone, 2)
            ),
            Report::SpeedCalcAmps => write!(
                out,
                "motor_speed_calc_amps={}",
                d(config.motor_speed_calc_amps, 3)
            ),
            Report::BatteryAmpsLimit => write!(
                out,
                "battery_amps_limit={}",
                d(config.battery_amps_limit, 3)
            ),
            Report::PrechargeTime => {
                write!(out, "precharge_time={}", d(config.precharge_time, 3))
            }
        }?;
        out.write_str("\r\n")
    }
}

/// A console request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Empty line: print the banner.
    Banner,
    ShowConfig,
    Save,
    Idle,
    Restart,
    ResetAmpHours,
    Set(Field, u16),
}

impl Command {
    /// Resolve a keyword and its optional numeric argument.
    pub fn from_words(keyword: &str, value: Option<i32>) -> Result<Command, CommandError> {
        let command = match keyword {
            "config" => Command::ShowConfig,
            "save" => Command::Save,
            "idle" => Command::Idle,
            "restart" => Command::Restart,
            "reset-ah" => Command::ResetAmpHours,
            _ => {
                let field = Field::from_keyword(keyword).ok_or(CommandError::UnknownCommand)?;
                let value = value.ok_or(CommandError::MissingValue)?;
                let max = field.max();
                if value < 0 || value > max as i32 {
                    return Err(CommandError::OutOfRange { value, max });
                }
                Command::Set(field, value as u16)
            }
        };
        Ok(command)
    }

    /// Split a received line at the first space.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Banner);
        }
        match line.split_once(' ') {
            Some((keyword, arg)) => {
                let value = arg.trim().parse::<i32>().map_err(|_| CommandError::MissingValue)?;
                Self::from_words(keyword, Some(value))
            }
            None => Self::from_words(line, None),
        }
    }
}

/// Characters kept per command line; the rest are echoed and dropped.
pub const LINE_CAPACITY: usize = 31;

const CR: u8 = 0x0d;

/// What the terminal should see for one received byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Byte(u8),
    /// Line finished; answer LF CR and process the line.
    EndOfLine,
}

/// Assembles console bytes into a command line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: String<LINE_CAPACITY>,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            line: String::new(),
        }
    }

    pub fn push(&mut self, byte: u8) -> Echo {
        if byte == CR {
            return Echo::EndOfLine;
        }
        if byte.is_ascii() {
            // full buffer: keep the head of the line
            let _ = self.line.push(byte as char);
        }
        Echo::Byte(byte)
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }
}
