//! Interrupt-side control pipeline
//!
//! [`ControlLoop`] owns everything only the timer interrupt touches. The
//! firmware keeps one in a static and calls
//! [`ControlLoop::on_timer_overflow`] from the PWM timer's update handler.

use crate::control::energy::battery_amps;
use crate::control::faults::{Fault, FaultMask};
use crate::control::overspeed::{OverspeedEstimator, OverspeedEvent};
use crate::control::regulator::{duty_register, DutyFilter, Regulator};
use crate::control::shaper::{shape_current, ShaperInputs, ThrottleMonitor, ThrottleStep};
use crate::fmt::*;
use crate::hardware::PowerStage;
use crate::state::SharedState;
use crate::tick::{TickEvent, TickSource};

/// 1kHz responsibilities carried by the 4kHz regulator, one per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubTask {
    ThrottleValidity,
    ReferenceShaping,
    EnergyAccounting,
    OverspeedCheck,
}

impl SubTask {
    pub const fn next(self) -> Self {
        match self {
            SubTask::ThrottleValidity => SubTask::ReferenceShaping,
            SubTask::ReferenceShaping => SubTask::EnergyAccounting,
            SubTask::EnergyAccounting => SubTask::OverspeedCheck,
            SubTask::OverspeedCheck => SubTask::ThrottleValidity,
        }
    }
}

pub struct ControlLoop {
    tick: TickSource,
    regulator: Regulator,
    filter: DutyFilter,
    /// Sub-task of the previous regulator run
    phase: SubTask,
    throttle: ThrottleMonitor,
    overspeed: OverspeedEstimator,
    throttle_ref: i16,
    current_ref: i16,
}

impl ControlLoop {
    /// # Arguments
    /// * `zero_offset` - zero-current sensor reading from startup calibration
    pub const fn new(zero_offset: u16) -> Self {
        Self {
            tick: TickSource::new(),
            regulator: Regulator::new(zero_offset),
            filter: DutyFilter::new(),
            phase: SubTask::ThrottleValidity,
            throttle: ThrottleMonitor::new(),
            overspeed: OverspeedEstimator::new(),
            throttle_ref: 0,
            current_ref: 0,
        }
    }

    pub fn regulator(&self) -> &Regulator {
        &self.regulator
    }

    pub fn phase(&self) -> SubTask {
        self.phase
    }

    /// PWM timer overflow entry point.
    pub fn on_timer_overflow(&mut self, stage: &mut impl PowerStage, shared: &SharedState) {
        if let TickEvent::CurrentReady(raw_current_fb) = self.tick.on_overflow(stage, shared) {
            // Skip rather than nest if the previous run is still going
            match shared.regulator_gate.try_enter() {
                Some(_busy) => self.run_regulator(raw_current_fb, stage, shared),
                None => trace!("Regulator busy, slot skipped"),
            }
        }
    }

    /// One regulator invocation followed by one 1kHz sub-task.
    pub fn run_regulator(
        &mut self,
        raw_current_fb: u16,
        stage: &mut impl PowerStage,
        shared: &SharedState,
    ) {
        let tuning = shared.tuning.get();

        let out = self.regulator.step(raw_current_fb, self.current_ref, tuning.gains);
        if out.sense_fault && !shared.faults.get().contains(Fault::SenseReference) {
            error!("Current sensor reference lost: raw={}", raw_current_fb);
            shared.raise(Fault::SenseReference);
        }
        stage.write_duty(duty_register(out.duty));
        shared.duty.set(out.duty);
        shared.current_fb.set(out.feedback);
        let duty_lpf = self.filter.update(out.duty, tuning.config.pwm_filter);

        self.phase = self.phase.next();
        match self.phase {
            SubTask::ThrottleValidity => {
                match self.throttle.step(shared.raw_throttle.get(), &tuning.config) {
                    ThrottleStep::Reference(reference) => {
                        self.throttle_ref = reference;
                        shared.throttle_ref.set(reference);
                    }
                    ThrottleStep::FaultLatched => {
                        shared.raise(Fault::Throttle);
                    }
                    ThrottleStep::Suspect => {}
                }
            }
            SubTask::ReferenceShaping => {
                let inputs = ShaperInputs {
                    throttle_ref: self.throttle_ref,
                    current_ref: self.current_ref,
                    duty_lpf,
                    max_current_ref: shared.max_current_ref.get(),
                    battery_limit: tuning.battery_limit,
                    faulted: !shared.faults.get().is_clear(),
                };
                self.current_ref = shape_current(&inputs, &tuning.config);
                shared.current_ref.set(self.current_ref);
            }
            SubTask::EnergyAccounting => {
                let amps = battery_amps(out.feedback, out.duty);
                shared.battery_amps.set(amps);
                shared.battery_ah.update(|mut ah| {
                    ah.accumulate(amps);
                    ah
                });
            }
            SubTask::OverspeedCheck => {
                let faulted = shared.faults.get().contains(Fault::MotorOverspeed);
                match self
                    .overspeed
                    .step(&tuning.overspeed, faulted, duty_lpf, out.feedback)
                {
                    Some(OverspeedEvent::Latched) => {
                        shared.raise(Fault::MotorOverspeed);
                    }
                    Some(OverspeedEvent::Cleared) => {
                        shared.clear(FaultMask::NONE.with(Fault::MotorOverspeed));
                    }
                    None => {}
                }
            }
        }
    }
}
