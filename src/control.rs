// Control pipeline: current regulator, reference shaping and the protective estimators

pub mod energy;
pub mod faults;
pub mod overspeed;
pub mod regulator;
pub mod shaper;
pub mod thermal;

pub use energy::{battery_amps, AmpHourCounter};
pub use faults::{Fault, FaultMask, PrechargeTimer};
pub use overspeed::{OverspeedEstimator, OverspeedEvent, OverspeedSettings};
pub use regulator::{DutyFilter, PiGains, Regulator, RegulatorOutput, VrefError};
pub use shaper::{ShaperInputs, ThrottleMonitor, ThrottleStep};
