//! Thread-mode supervisor
//!
//! Owns the working configuration and its store, applies console commands,
//! and runs the housekeeping pass. The interrupt side only ever sees the
//! configuration through the published [`Tuning`](crate::state::Tuning).

use core::fmt::{self, Write};

use embedded_storage::Storage;

use crate::config::params::{BANNER, IDLE_WINDOW_MS};
use crate::config::{Config, ConfigStore, Crc16, LoadSource};
use crate::console::{Command, CommandError, Field, Report};
use crate::control::energy::AmpHourCounter;
use crate::control::faults::{Fault, FaultMask, PrechargeTimer};
use crate::control::regulator::calibrate_zero_offset;
use crate::fmt::*;
use crate::hardware::{PowerStage, StatusOutputs, Watchdog};
use crate::housekeeping::Housekeeping;
use crate::state::SharedState;
use crate::telemetry::{Fixed, TelemetryRecord};
use crate::timing::{IdleMeter, MillisClock};

/// Measure the current sensor zero and reset the over-current latch.
///
/// Runs before the PWM timer starts. An out-of-range reference raises the
/// sense-reference fault; the measured value is used as the offset either way.
pub fn prepare_power_stage(shared: &SharedState, stage: &mut impl PowerStage) -> u16 {
    let zero_offset = calibrate_zero_offset(stage).unwrap_or_else(|e| {
        shared.raise(Fault::SenseReference);
        e.measured()
    });
    stage.pulse_overcurrent_clear();
    zero_offset
}

/// What the console should print after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    Banner,
    Config,
    Field(Report),
    Saved,
    SaveFailed,
    /// Save refused while the output is driven
    SaveRefused,
    AmpHoursReset,
    /// Idle ratio in percent
    Idle(u16),
    /// Caller must reset the MCU.
    Restart,
}

impl Reply {
    pub fn write_to(&self, config: &Config, out: &mut impl Write) -> fmt::Result {
        match self {
            Reply::Banner => out.write_str(BANNER),
            Reply::Config => Report::ALL
                .iter()
                .try_for_each(|report| report.write_to(config, out)),
            Reply::Field(report) => report.write_to(config, out),
            Reply::Saved => out.write_str("configuration written to EE\r\n"),
            Reply::SaveFailed => out.write_str("configuration write failed\r\n"),
            Reply::SaveRefused => out.write_str("motor running, configuration not written\r\n"),
            Reply::AmpHoursReset => out.write_str("battery amp hours reset\r\n"),
            Reply::Idle(percent) => write!(out, "MCU {}% idle\r\n", Fixed::decimal(*percent, 3)),
            Reply::Restart => Ok(()),
        }
    }
}

pub struct Supervisor<'a, S: Storage, C: Crc16, W: Watchdog> {
    shared: &'a SharedState,
    store: ConfigStore<S, C>,
    watchdog: W,
    config: Config,
    housekeeping: Housekeeping,
    idle: IdleMeter,
}

impl<'a, S: Storage, C: Crc16, W: Watchdog> Supervisor<'a, S, C, W> {
    /// Load the configuration and arm the boot faults.
    ///
    /// # Arguments
    /// * `idle` - loop-count baseline taken while nothing else was running
    pub fn start(
        shared: &'a SharedState,
        mut store: ConfigStore<S, C>,
        mut watchdog: W,
        idle: IdleMeter,
    ) -> Self {
        let report = store.load(&mut watchdog);
        if report.source == LoadSource::Defaults {
            info!("Running on default configuration");
        }
        let config = report.config;
        shared.publish(config);

        let precharge_configured = config.precharge_time > 0;
        let boot = FaultMask::at_boot(precharge_configured);
        shared
            .faults
            .update(|mask| FaultMask::from_bits(mask.bits() | boot.bits()));
        if precharge_configured {
            info!("Precharge: {} x 100ms", config.precharge_time);
        }

        Self {
            shared,
            store,
            watchdog,
            config,
            housekeeping: Housekeeping::new(shared.now_ms(), PrechargeTimer::new(config.precharge_time)),
            idle,
        }
    }

    /// Working configuration, as last published.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Housekeeping pass; returns a telemetry record when one is due.
    pub fn poll(&mut self, outputs: &mut impl StatusOutputs) -> Option<TelemetryRecord> {
        self.watchdog.feed();
        self.housekeeping.poll(self.shared, outputs)
    }

    /// Parse and run one console line.
    ///
    /// Rejected lines produce no reply, only a log entry.
    pub fn handle_line(&mut self, line: &str, clock: &impl MillisClock) -> Option<Reply> {
        match Command::parse(line) {
            Ok(command) => Some(self.execute(command, clock)),
            Err(e) => {
                log_rejected(e);
                None
            }
        }
    }

    /// Apply a command.
    ///
    /// # Arguments
    /// * `clock` - time base for the idle measurement
    pub fn execute(&mut self, command: Command, clock: &impl MillisClock) -> Reply {
        match command {
            Command::Banner => Reply::Banner,
            Command::ShowConfig => Reply::Config,
            Command::Save if !self.shared.output_quiescent() => {
                error!("Save refused: output driven");
                Reply::SaveRefused
            }
            Command::Save => match self.store.save(&mut self.config, &mut self.watchdog) {
                Ok(()) => {
                    self.shared.publish(self.config);
                    Reply::Saved
                }
                Err(_) => {
                    error!("Configuration save failed");
                    Reply::SaveFailed
                }
            },
            Command::Idle => Reply::Idle(self.idle.measure(clock, IDLE_WINDOW_MS)),
            Command::Restart => {
                info!("Restart requested");
                Reply::Restart
            }
            Command::ResetAmpHours => {
                self.shared.battery_ah.set(AmpHourCounter::new());
                Reply::AmpHoursReset
            }
            Command::Set(field, value) => {
                field.apply(&mut self.config, value);
                self.shared.publish(self.config);
                if field == Field::RtdPeriod {
                    self.housekeeping.restart_telemetry(self.shared.now_ms());
                }
                debug!("{} = {}", field.keyword(), value);
                Reply::Field(field.report())
            }
        }
    }
}

fn log_rejected(e: CommandError) {
    match e {
        CommandError::OutOfRange { value, max } => {
            error!("Console value {} out of range (max {})", value, max)
        }
        CommandError::MissingValue => error!("Console command needs a numeric value"),
        CommandError::UnknownCommand => debug!("Unknown console command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::eeprom::tests::RamStorage;
    use crate::config::SoftCrc16;
    use crate::hardware::mock::{RecordingOutputs, RecordingWatchdog, ScriptedStage};
    use crate::telemetry::Line;
    use crate::timing::mock::SteppingClock;

    type TestSupervisor<'a> = Supervisor<'a, RamStorage, SoftCrc16, RecordingWatchdog>;

    fn start(shared: &SharedState, storage: RamStorage) -> TestSupervisor<'_> {
        Supervisor::start(
            shared,
            ConfigStore::new(storage, SoftCrc16),
            RecordingWatchdog::default(),
            IdleMeter::from_baseline(1000),
        )
    }

    fn stored(config: Config) -> RamStorage {
        let mut store: ConfigStore<_, _> = ConfigStore::new(RamStorage::blank(), SoftCrc16);
        let mut config = config;
        store.save(&mut config, &mut RecordingWatchdog::default()).unwrap();
        store.release().0
    }

    fn clock() -> SteppingClock {
        SteppingClock::new(0, 1)
    }

    #[test]
    fn test_blank_storage_boots_on_defaults() {
        let shared = SharedState::new();
        let sup = start(&shared, RamStorage::blank());
        assert_eq!(sup.config(), &Config::default());
        assert_eq!(shared.faults.get(), FaultMask::at_boot(false));
        assert_eq!(shared.tuning.get().gains.k1, 2 << 10);
    }

    #[test]
    fn test_stored_precharge_arms_wait_fault() {
        let shared = SharedState::new();
        let mut config = Config::default();
        config.precharge_time = 20;
        config.kp = 9;
        let sup = start(&shared, stored(config));
        assert_eq!(sup.config().kp, 9);
        assert!(shared.faults.get().contains(Fault::PrechargeWait));
        assert!(shared.faults.get().contains(Fault::HighPedalLockout));
    }

    #[test]
    fn test_boot_faults_keep_earlier_sense_fault() {
        let shared = SharedState::new();
        let mut stage = ScriptedStage::new(683, 300, 300);
        let offset = prepare_power_stage(&shared, &mut stage);
        assert_eq!(offset, 300);
        assert_eq!(stage.clear_pulses, 1);
        let _sup = start(&shared, RamStorage::blank());
        assert!(shared.faults.get().contains(Fault::SenseReference));
        assert!(shared.faults.get().contains(Fault::HighPedalLockout));
    }

    #[test]
    fn test_prepare_power_stage_in_range() {
        let shared = SharedState::new();
        let mut stage = ScriptedStage::new(683, 300, 530);
        assert_eq!(prepare_power_stage(&shared, &mut stage), 530);
        assert!(shared.faults.get().is_clear());
    }

    #[test]
    fn test_field_write_republishes_tuning() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        let reply = sup.handle_line("kp 5", &clock());
        assert_eq!(reply, Some(Reply::Field(Report::Gains)));
        assert_eq!(shared.tuning.get().gains.k1, 5 << 10);

        sup.handle_line("bat-amps-lim 100", &clock());
        assert_eq!(shared.tuning.get().battery_limit, 100 * 510);
        sup.handle_line("motor-os-th 20", &clock());
        assert_eq!(shared.tuning.get().overspeed.threshold, 20 << 10);
    }

    #[test]
    fn test_rejected_value_changes_nothing() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        assert_eq!(sup.handle_line("ki 501", &clock()), None);
        assert_eq!(sup.handle_line("warp 9", &clock()), None);
        assert_eq!(sup.config(), &Config::default());
    }

    #[test]
    fn test_save_persists_working_config() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        sup.execute(Command::Set(Field::Ki, 300), &clock());
        assert_eq!(sup.execute(Command::Save, &clock()), Reply::Saved);

        let stored = sup.store.read_copy(3).unwrap();
        assert_eq!(stored.ki, 300);
        assert!(stored.is_valid(&mut SoftCrc16));
        assert_eq!(sup.watchdog.pauses, 4);
        assert!(sup.watchdog.enabled);
    }

    #[test]
    fn test_save_refused_while_current_demanded() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        shared.faults.set(FaultMask::NONE);
        shared.current_ref.set(40);
        shared.duty.set(120);
        sup.execute(Command::Set(Field::Ki, 300), &clock());

        assert_eq!(sup.handle_line("save", &clock()), Some(Reply::SaveRefused));
        assert_eq!(sup.watchdog.pauses, 0);
        assert!(!sup.store.read_copy(0).unwrap().validate_header());

        // duty still decaying through the filter
        shared.current_ref.set(0);
        assert_eq!(sup.execute(Command::Save, &clock()), Reply::SaveRefused);

        shared.duty.set(0);
        assert_eq!(sup.execute(Command::Save, &clock()), Reply::Saved);
        assert_eq!(sup.store.read_copy(0).unwrap().ki, 300);
    }

    #[test]
    fn test_save_allowed_while_fault_holds_output_off() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        shared.current_ref.set(40);
        shared.duty.set(120);
        shared.raise(Fault::Throttle);
        assert_eq!(sup.execute(Command::Save, &clock()), Reply::Saved);
    }

    #[test]
    fn test_save_failure_reported() {
        let shared = SharedState::new();
        let mut storage = RamStorage::blank();
        storage.fail_writes = true;
        let mut sup = start(&shared, storage);
        assert_eq!(sup.execute(Command::Save, &clock()), Reply::SaveFailed);
    }

    #[test]
    fn test_reset_amp_hours() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        shared.battery_ah.set(AmpHourCounter::from_raw(5_000_000));
        assert_eq!(sup.execute(Command::ResetAmpHours, &clock()), Reply::AmpHoursReset);
        assert_eq!(shared.battery_ah.get().raw(), 0);
    }

    #[test]
    fn test_idle_against_baseline() {
        let shared = SharedState::new();
        let mut sup = Supervisor::start(
            &shared,
            ConfigStore::new(RamStorage::blank(), SoftCrc16),
            RecordingWatchdog::default(),
            IdleMeter::calibrate(&SteppingClock::new(0, 8), IDLE_WINDOW_MS),
        );
        match sup.execute(Command::Idle, &SteppingClock::new(0, 8)) {
            Reply::Idle(percent) => assert_eq!(percent, 100),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_reply_rendering() {
        let config = Config::default();
        let mut out: heapless::String<1024> = heapless::String::new();
        Reply::Config.write_to(&config, &mut out).unwrap();
        assert_eq!(out.matches("\r\n").count(), Report::ALL.len());

        let mut line = Line::new();
        Reply::Idle(87).write_to(&config, &mut line).unwrap();
        assert_eq!(line, "MCU 087% idle\r\n");
    }

    #[test]
    fn test_telemetry_period_restarts_schedule() {
        let shared = SharedState::new();
        let mut sup = start(&shared, RamStorage::blank());
        let mut outputs = RecordingOutputs::default();
        shared.millis.set(1234);
        sup.handle_line("rtd-period 10", &clock());
        shared.millis.set(1243);
        assert!(sup.poll(&mut outputs).is_none());
        shared.millis.set(1244);
        assert!(sup.poll(&mut outputs).is_some());
        assert_eq!(sup.watchdog.feeds, 2);
    }
}
