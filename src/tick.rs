//! Timer-overflow tick cascade
//!
//! The PWM timer overflows at 15.625kHz, center aligned with the output.
//! Every other overflow is an 8kHz slot; slots alternate between
//! collecting a throttle/heatsink conversion and collecting a current
//! feedback conversion (4kHz), which is what triggers the regulator. Every
//! fourth throttle/heatsink slot advances the millisecond counter, giving
//! 976.5625Hz.
//!
//! With `pwm-8k` the timer runs at half rate and every overflow is a slot.

use crate::config::params::NUM_OC_CYCLES_OFF;
use crate::hardware::{AnalogChannel, PowerStage};
use crate::state::SharedState;

#[cfg(not(feature = "pwm-8k"))]
const OVERFLOW_STEP: u16 = 1;
#[cfg(feature = "pwm-8k")]
const OVERFLOW_STEP: u16 = 2;

/// What one overflow produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickEvent {
    /// Off slot (16kHz build only).
    Skipped,
    /// Throttle or heatsink sample collected, current conversion started.
    Sampled,
    /// Current feedback collected; the regulator is due.
    CurrentReady(u16),
}

/// Counters and channel rotation owned by the timer interrupt.
#[derive(Debug, Clone)]
pub struct TickSource {
    counter_16k: u16,
    counter_8k: u16,
    counter_4k: u16,
    /// Slow channel whose conversion is in flight
    slow_channel: AnalogChannel,
    oc_cycles: u8,
}

impl TickSource {
    pub const fn new() -> Self {
        Self {
            counter_16k: 0,
            counter_8k: 0,
            counter_4k: 0,
            slow_channel: AnalogChannel::Throttle,
            oc_cycles: 0,
        }
    }

    pub fn overcurrent_cycles(&self) -> u8 {
        self.oc_cycles
    }

    /// Handle one timer overflow.
    pub fn on_overflow(&mut self, stage: &mut impl PowerStage, shared: &SharedState) -> TickEvent {
        self.counter_16k = self.counter_16k.wrapping_add(OVERFLOW_STEP);
        if OVERFLOW_STEP == 1 && self.counter_16k & 1 == 0 {
            return TickEvent::Skipped;
        }

        self.counter_8k = self.counter_8k.wrapping_add(1);
        if self.counter_8k & 1 == 1 {
            let sample = stage.read_conversion();
            stage.start_conversion(AnalogChannel::CurrentFeedback);
            match self.slow_channel {
                AnalogChannel::HeatsinkTemp => shared.raw_heatsink.set(sample),
                _ => shared.raw_throttle.set(sample),
            }

            self.counter_4k = self.counter_4k.wrapping_add(1);
            if self.counter_4k & 0x03 == 0 {
                shared.millis.update(|ms| ms.wrapping_add(1));
            }

            self.check_overcurrent(stage);
            TickEvent::Sampled
        } else {
            let raw_current_fb = stage.read_conversion();
            shared.raw_current_fb.set(raw_current_fb);
            self.slow_channel = match self.slow_channel {
                AnalogChannel::Throttle => AnalogChannel::HeatsinkTemp,
                _ => AnalogChannel::Throttle,
            };
            stage.start_conversion(self.slow_channel);
            TickEvent::CurrentReady(raw_current_fb)
        }
    }

    /// Pulse the trip latch clear after enough consecutive tripped slots.
    fn check_overcurrent(&mut self, stage: &mut impl PowerStage) {
        if !stage.overcurrent_tripped() {
            self.oc_cycles = 0;
            return;
        }
        self.oc_cycles += 1;
        if self.oc_cycles >= NUM_OC_CYCLES_OFF {
            self.oc_cycles = 0;
            stage.pulse_overcurrent_clear();
        }
    }
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new()
    }
}
