//! Cougar DC motor controller core
//!
//! Hardware-independent half of the controller: the interrupt-side current
//! loop and its 1kHz sub-tasks, the fault supervisor, the redundant
//! configuration store, and the thread-mode housekeeping and console logic.
//! The `firmware` crate binds it to the STM32G4 peripherals.
#![cfg_attr(not(test), no_std)]

pub(crate) mod fmt;

pub mod config;
pub mod console;
pub mod control;
pub mod control_loop;
pub mod hardware;
pub mod housekeeping;
pub mod integrity;
pub mod snapshot;
pub mod state;
pub mod supervisor;
pub mod sync;
pub mod telemetry;
pub mod tick;
pub mod timing;

pub use control_loop::ControlLoop;
pub use state::{SharedState, Tuning};
pub use supervisor::{prepare_power_stage, Reply, Supervisor};
