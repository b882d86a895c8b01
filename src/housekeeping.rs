//! Thread-mode housekeeping pass
//!
//! Runs on every iteration of the supervisor loop: refreshes the realtime
//! snapshot, applies thermal cutback, and emits telemetry when due. Every
//! 100ms it also drives the status LED and advances the lockout and
//! precharge rules.

use crate::config::params::HOUSEKEEPING_PERIOD_MS;
use crate::control::faults::{housekeeping_transitions, PrechargeTimer};
use crate::control::thermal;
use crate::hardware::StatusOutputs;
use crate::snapshot::RealtimeSnapshot;
use crate::state::SharedState;
use crate::telemetry::{TelemetryRecord, TelemetrySchedule};
use crate::timing::{elapsed, MillisClock};

pub struct Housekeeping {
    slow_pass_due: u16,
    telemetry: TelemetrySchedule,
    precharge: PrechargeTimer,
}

impl Housekeeping {
    pub fn new(now: u16, precharge: PrechargeTimer) -> Self {
        Self {
            slow_pass_due: now,
            telemetry: TelemetrySchedule::new(now),
            precharge,
        }
    }

    pub fn precharge(&self) -> &PrechargeTimer {
        &self.precharge
    }

    /// Restart the telemetry period from `now` (after a period change).
    pub fn restart_telemetry(&mut self, now: u16) {
        self.telemetry.restart(now);
    }

    /// One pass.
    ///
    /// # Returns
    /// A telemetry record when one is due.
    pub fn poll(
        &mut self,
        shared: &SharedState,
        outputs: &mut impl StatusOutputs,
    ) -> Option<TelemetryRecord> {
        let snapshot = RealtimeSnapshot::capture(shared);
        shared
            .max_current_ref
            .set(thermal::max_current_ref(snapshot.raw_heatsink));

        let now = shared.now_ms();
        let period = shared.config().rtd_period;
        let record = self
            .telemetry
            .poll(now, period)
            .then(|| TelemetryRecord::new(&snapshot, shared.duty.get(), shared.faults.get()));

        if elapsed(self.slow_pass_due, now) >= HOUSEKEEPING_PERIOD_MS {
            self.slow_pass_due = self.slow_pass_due.wrapping_add(HOUSEKEEPING_PERIOD_MS);
            self.slow_pass(shared, snapshot.throttle_ref, outputs);
        }

        record
    }

    fn slow_pass(&mut self, shared: &SharedState, throttle_ref: i16, outputs: &mut impl StatusOutputs) {
        let faults = shared.faults.get();
        if faults.is_clear() {
            outputs.set_led(true);
            return;
        }

        outputs.toggle_led();
        let (clear, close_contactor) =
            housekeeping_transitions(faults, throttle_ref, &mut self.precharge);
        if close_contactor {
            outputs.close_contactor();
        }
        if !clear.is_clear() {
            shared.clear(clear);
        }
    }
}
