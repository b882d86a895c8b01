//! Periodic realtime data record
//!
//! ```text
//! TR=ttt CR=ccc CF=fff PW=ppp HS=hhhh RT=rrrr FB=XX BA=bbb AH=aaa.a
//! ```
//!
//! Every field is fixed width with leading zeros. Values wider than their
//! field keep only the low digits.

use core::fmt::{self, Write};

use crate::control::faults::FaultMask;
use crate::snapshot::RealtimeSnapshot;
use crate::timing::elapsed;

/// One line of console output.
pub type Line = heapless::String<80>;

/// Fixed-width, zero-padded, truncating number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed {
    value: u32,
    digits: usize,
    radix: u32,
}

/// Widest field any report uses.
const MAX_DIGITS: usize = 5;

impl Fixed {
    pub const fn decimal(value: u16, digits: usize) -> Self {
        Self {
            value: value as u32,
            digits,
            radix: 10,
        }
    }

    pub const fn hex(value: u16, digits: usize) -> Self {
        Self {
            value: value as u32,
            digits,
            radix: 16,
        }
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [b'0'; MAX_DIGITS];
        let digits = &mut buf[..self.digits.min(MAX_DIGITS)];
        let mut value = self.value;
        for slot in digits.iter_mut().rev() {
            let digit = (value % self.radix) as u8;
            *slot = if digit < 10 {
                b'0' + digit
            } else {
                b'A' + digit - 10
            };
            value /= self.radix;
        }
        for &b in digits.iter() {
            f.write_char(b as char)?;
        }
        Ok(())
    }
}

/// Values carried by one telemetry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub throttle_ref: i16,
    pub current_ref: i16,
    pub current_fb: i16,
    pub duty: u16,
    pub raw_heatsink: u16,
    pub raw_throttle: u16,
    pub faults: FaultMask,
    pub battery_amps: u16,
    /// Consumed charge, 0.1Ah
    pub amp_hour_tenths: u16,
}

impl TelemetryRecord {
    pub fn new(snapshot: &RealtimeSnapshot, duty: u16, faults: FaultMask) -> Self {
        Self {
            throttle_ref: snapshot.throttle_ref,
            current_ref: snapshot.current_ref,
            current_fb: snapshot.current_fb,
            duty,
            raw_heatsink: snapshot.raw_heatsink,
            raw_throttle: snapshot.raw_throttle,
            faults,
            battery_amps: snapshot.battery_amps,
            amp_hour_tenths: snapshot.battery_ah.tenths(),
        }
    }

    pub fn write_to(&self, out: &mut impl Write) -> fmt::Result {
        write!(
            out,
            "TR={} CR={} CF={} PW={} HS={} RT={} FB={} BA={} AH={}.{}\r\n",
            Fixed::decimal(self.throttle_ref as u16, 3),
            Fixed::decimal(self.current_ref as u16, 3),
            Fixed::decimal(self.current_fb as u16, 3),
            Fixed::decimal(self.duty, 3),
            Fixed::decimal(self.raw_heatsink, 4),
            Fixed::decimal(self.raw_throttle, 4),
            Fixed::hex(self.faults.bits() as u16, 2),
            Fixed::decimal(self.battery_amps, 3),
            Fixed::decimal(self.amp_hour_tenths / 10, 3),
            Fixed::decimal(self.amp_hour_tenths % 10, 1),
        )
    }

    pub fn to_line(&self) -> Result<Line, fmt::Error> {
        let mut line = Line::new();
        self.write_to(&mut line)?;
        Ok(line)
    }
}

/// Drift-free emission schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySchedule {
    due: u16,
}

impl TelemetrySchedule {
    pub const fn new(now: u16) -> Self {
        Self { due: now }
    }

    /// Start counting the period from `now`.
    pub fn restart(&mut self, now: u16) {
        self.due = now;
    }

    /// True once `period` ms have passed since the last emission.
    ///
    /// The reference point advances by exactly `period`, so a late poll does
    /// not push later records back. A zero period never fires.
    pub fn poll(&mut self, now: u16, period: u16) -> bool {
        if period == 0 || elapsed(self.due, now) < period {
            return false;
        }
        self.due = self.due.wrapping_add(period);
        true
    }
}
