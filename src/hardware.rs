//! Hardware seams
//!
//! The control core never touches registers. The firmware implements these
//! traits on the STM32 peripherals; tests implement them in memory.

/// Analog inputs sampled by the tick source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogChannel {
    /// Pedal potentiometer (raw counts fall as the pedal is pressed)
    Throttle,
    /// Heatsink thermistor
    HeatsinkTemp,
    /// Hall-effect current sensor
    CurrentFeedback,
}

/// ADC, PWM and over-current latch as seen from the timer interrupt.
///
/// ADC results are 10-bit counts (0..=1023) whatever the converter width.
pub trait PowerStage {
    /// Result of the conversion started on the previous call to
    /// [`start_conversion`](Self::start_conversion).
    fn read_conversion(&mut self) -> u16;

    /// Begin a conversion; the result is collected on a later tick.
    fn start_conversion(&mut self, channel: AnalogChannel);

    /// Convert and busy-wait for the result. Startup calibration only.
    fn convert_blocking(&mut self, channel: AnalogChannel) -> u16;

    /// Level of the over-current trip input (true = tripped).
    fn overcurrent_tripped(&mut self) -> bool;

    /// Drive the latch clear line low for a few hundred nanoseconds and release it.
    fn pulse_overcurrent_clear(&mut self);

    /// Single atomic write of the PWM compare register.
    fn write_duty(&mut self, register: u16);
}

/// Watchdog service from the thread-mode loop, paused around non-volatile writes.
pub trait Watchdog {
    /// Restart the timeout. Called once per supervisor pass.
    fn feed(&mut self);
    fn disable(&mut self);
    fn enable(&mut self);
}

impl<W: Watchdog + ?Sized> Watchdog for &mut W {
    fn feed(&mut self) {
        (**self).feed()
    }

    fn disable(&mut self) {
        (**self).disable()
    }

    fn enable(&mut self) {
        (**self).enable()
    }
}

/// Keeps the watchdog disabled while alive, re-enables it on drop.
pub struct WatchdogPause<'a, W: Watchdog + ?Sized> {
    watchdog: &'a mut W,
}

impl<'a, W: Watchdog + ?Sized> WatchdogPause<'a, W> {
    pub fn new(watchdog: &'a mut W) -> Self {
        watchdog.disable();
        Self { watchdog }
    }
}

impl<W: Watchdog + ?Sized> Drop for WatchdogPause<'_, W> {
    fn drop(&mut self) {
        self.watchdog.enable();
    }
}

/// Status LED and contactor driven by the housekeeping pass.
pub trait StatusOutputs {
    fn set_led(&mut self, lit: bool);
    fn toggle_led(&mut self);
    /// Energize the main contactor (end of precharge).
    fn close_contactor(&mut self);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Debug, Default)]
    pub struct RecordingWatchdog {
        pub feeds: u32,
        pub pauses: u32,
        pub resumes: u32,
        pub enabled: bool,
    }

    impl Watchdog for RecordingWatchdog {
        fn feed(&mut self) {
            self.feeds += 1;
        }

        fn disable(&mut self) {
            assert!(self.pauses == self.resumes, "nested watchdog pause");
            self.pauses += 1;
            self.enabled = false;
        }

        fn enable(&mut self) {
            self.resumes += 1;
            self.enabled = true;
        }
    }

    /// Power stage with fixed sensor levels and recorded outputs.
    #[derive(Debug)]
    pub struct ScriptedStage {
        pub throttle: u16,
        pub heatsink: u16,
        pub current: u16,
        pub tripped: bool,
        pub pending: Option<AnalogChannel>,
        pub started: [u32; 3],
        pub clear_pulses: u32,
        pub duty_writes: u32,
        pub last_duty: u16,
    }

    impl ScriptedStage {
        pub fn new(throttle: u16, heatsink: u16, current: u16) -> Self {
            Self {
                throttle,
                heatsink,
                current,
                tripped: false,
                pending: None,
                started: [0; 3],
                clear_pulses: 0,
                duty_writes: 0,
                last_duty: 0,
            }
        }

        fn level(&self, channel: AnalogChannel) -> u16 {
            match channel {
                AnalogChannel::Throttle => self.throttle,
                AnalogChannel::HeatsinkTemp => self.heatsink,
                AnalogChannel::CurrentFeedback => self.current,
            }
        }
    }

    impl PowerStage for ScriptedStage {
        fn read_conversion(&mut self) -> u16 {
            self.pending.map(|c| self.level(c)).unwrap_or(0)
        }

        fn start_conversion(&mut self, channel: AnalogChannel) {
            self.started[channel as usize] += 1;
            self.pending = Some(channel);
        }

        fn convert_blocking(&mut self, channel: AnalogChannel) -> u16 {
            self.level(channel)
        }

        fn overcurrent_tripped(&mut self) -> bool {
            self.tripped
        }

        fn pulse_overcurrent_clear(&mut self) {
            self.clear_pulses += 1;
        }

        fn write_duty(&mut self, register: u16) {
            self.duty_writes += 1;
            self.last_duty = register;
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingOutputs {
        pub led: bool,
        pub toggles: u32,
        pub contactor_closed: bool,
    }

    impl StatusOutputs for RecordingOutputs {
        fn set_led(&mut self, lit: bool) {
            self.led = lit;
        }

        fn toggle_led(&mut self) {
            self.led = !self.led;
            self.toggles += 1;
        }

        fn close_contactor(&mut self) {
            self.contactor_closed = true;
        }
    }
}
