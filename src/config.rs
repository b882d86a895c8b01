//! Configuration module
//!
//! Calibration constants, the persisted parameter record and its redundant
//! store.

pub mod checksum;
pub mod eeprom;
pub mod params;
pub mod storage;

pub use params::*;

pub use checksum::{Crc16, SoftCrc16};
pub use eeprom::{ConfigStore, LoadReport, LoadSource, StoreError};
pub use storage::{Config, CONFIG_RECORD_LEN};
