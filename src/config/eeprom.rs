//! Redundant configuration store
//!
//! `N` identical records sit back-to-back from a base address. A load keeps
//! the first copy whose magic and CRC check out and rewrites every copy that
//! does not; when no copy is good the compiled-in defaults are used and
//! nothing is written.

use embedded_storage::Storage;

use super::checksum::Crc16;
use super::params::{CONFIG_BASE_ADDRESS, CONFIG_COPIES};
use super::storage::{Config, CONFIG_RECORD_LEN};
use crate::fmt::*;
use crate::hardware::{Watchdog, WatchdogPause};

/// Storage operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError<E> {
    /// Reading a copy failed
    Read(E),

    /// Writing a copy failed
    Write(E),

    /// The copies do not fit in the storage device
    OutOfRange,
}

/// Where the adopted configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadSource {
    /// Copy `index` was the first valid one.
    Stored { index: u8 },
    /// No valid copy; defaults adopted in memory only.
    Defaults,
}

/// Result of [`ConfigStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadReport {
    pub config: Config,
    pub source: LoadSource,
    /// Bit `i` set when copy `i` failed validation.
    pub invalid_mask: u8,
    /// Bit `i` set when copy `i` was rewritten successfully.
    pub repaired_mask: u8,
}

/// Redundant, CRC-verified configuration storage.
pub struct ConfigStore<S, C, const N: usize = CONFIG_COPIES> {
    storage: S,
    crc: C,
    base: u32,
}

impl<S: Storage, C: Crc16, const N: usize> ConfigStore<S, C, N> {
    /// Store with copies starting at [`CONFIG_BASE_ADDRESS`].
    pub fn new(storage: S, crc: C) -> Self {
        Self::with_base(storage, crc, CONFIG_BASE_ADDRESS)
    }

    /// Fails to build when `N` does not fit the 8-bit copy masks.
    const COPIES_FIT_MASK: () = assert!(N >= 1 && N <= 8, "copy mask is 8 bits wide");

    pub fn with_base(storage: S, crc: C, base: u32) -> Self {
        let () = Self::COPIES_FIT_MASK;
        Self { storage, crc, base }
    }

    /// Number of redundant copies.
    pub const fn copies(&self) -> usize {
        N
    }

    /// Address of copy `index`.
    pub fn copy_address(&self, index: usize) -> u32 {
        self.base + (index * CONFIG_RECORD_LEN) as u32
    }

    fn check_range(&self) -> Result<(), StoreError<S::Error>> {
        let end = self.base as usize + N * CONFIG_RECORD_LEN;
        if end > self.storage.capacity() {
            return Err(StoreError::OutOfRange);
        }
        Ok(())
    }

    /// Read copy `index` without validating it.
    pub fn read_copy(&mut self, index: usize) -> Result<Config, StoreError<S::Error>> {
        let mut buffer = [0u8; CONFIG_RECORD_LEN];
        let address = self.copy_address(index);
        self.storage
            .read(address, &mut buffer)
            .map_err(StoreError::Read)?;
        Ok(Config::from_bytes(&buffer))
    }

    fn write_copy(
        &mut self,
        index: usize,
        bytes: &[u8; CONFIG_RECORD_LEN],
        watchdog: &mut impl Watchdog,
    ) -> Result<(), StoreError<S::Error>> {
        let address = self.copy_address(index);
        let _paused = WatchdogPause::new(watchdog);
        self.storage.write(address, bytes).map_err(StoreError::Write)
    }

    /// Load the configuration, repairing bad copies in place.
    ///
    /// Never fails: unreadable copies count as invalid and a total loss
    /// falls back to [`Config::new`].
    pub fn load(&mut self, watchdog: &mut impl Watchdog) -> LoadReport {
        if self.check_range().is_err() {
            error!("Config region exceeds storage capacity, using defaults");
            return LoadReport {
                config: Config::default(),
                source: LoadSource::Defaults,
                invalid_mask: ((1u16 << N) - 1) as u8,
                repaired_mask: 0,
            };
        }

        let mut adopted: Option<(usize, Config)> = None;
        let mut invalid_mask = 0u8;

        for index in 0..N {
            let valid = match self.read_copy(index) {
                Ok(copy) if copy.is_valid(&mut self.crc) => {
                    if adopted.is_none() {
                        adopted = Some((index, copy));
                    }
                    true
                }
                Ok(copy) => {
                    debug!(
                        "Config copy {} invalid: magic=0x{:04X}, crc=0x{:04X}",
                        index, copy.magic, copy.crc
                    );
                    false
                }
                Err(_) => {
                    error!("Config copy {} unreadable", index);
                    false
                }
            };
            if !valid {
                invalid_mask |= 1 << index;
            }
        }

        let Some((index, config)) = adopted else {
            error!("No valid config copy found, using defaults");
            return LoadReport {
                config: Config::default(),
                source: LoadSource::Defaults,
                invalid_mask,
                repaired_mask: 0,
            };
        };

        let bytes = config.to_bytes();
        let mut repaired_mask = 0u8;
        for bad in (0..N).filter(|i| invalid_mask & (1 << i) != 0) {
            match self.write_copy(bad, &bytes, watchdog) {
                Ok(()) => repaired_mask |= 1 << bad,
                Err(_) => error!("Failed to repair config copy {}", bad),
            }
        }

        info!(
            "Config loaded from copy {}, invalid=0b{:08b}, repaired=0b{:08b}",
            index, invalid_mask, repaired_mask
        );

        LoadReport {
            config,
            source: LoadSource::Stored { index: index as u8 },
            invalid_mask,
            repaired_mask,
        }
    }

    /// Seal `config` with a fresh CRC and write every copy.
    ///
    /// Each write runs with the watchdog paused. All copies are attempted;
    /// the first error is returned.
    pub fn save(
        &mut self,
        config: &mut Config,
        watchdog: &mut impl Watchdog,
    ) -> Result<(), StoreError<S::Error>> {
        self.check_range()?;
        config.seal(&mut self.crc);
        info!("Writing {} config copies, CRC16=0x{:04X}", N, config.crc);

        let bytes = config.to_bytes();
        let mut result = Ok(());
        for index in 0..N {
            if let Err(e) = self.write_copy(index, &bytes, watchdog) {
                error!("Config copy {} write failed", index);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Give back the storage device and CRC engine.
    pub fn release(self) -> (S, C) {
        (self.storage, self.crc)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::checksum::SoftCrc16;
    use crate::hardware::mock::RecordingWatchdog;
    use embedded_storage::ReadStorage;

    /// RAM-backed storage with per-copy write counters.
    pub struct RamStorage {
        pub bytes: [u8; 256],
        pub writes: [u32; 8],
        pub fail_writes: bool,
    }

    impl RamStorage {
        pub fn blank() -> Self {
            Self {
                bytes: [0xff; 256],
                writes: [0; 8],
                fail_writes: false,
            }
        }

        pub fn corrupt(&mut self, copy: usize, offset: usize) {
            self.bytes[copy * CONFIG_RECORD_LEN + offset] ^= 0x5a;
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RamError;

    impl ReadStorage for RamStorage {
        type Error = RamError;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), RamError> {
            let start = offset as usize;
            let end = start + bytes.len();
            if end > self.bytes.len() {
                return Err(RamError);
            }
            bytes.copy_from_slice(&self.bytes[start..end]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for RamStorage {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), RamError> {
            if self.fail_writes {
                return Err(RamError);
            }
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            self.writes[start / CONFIG_RECORD_LEN] += 1;
            Ok(())
        }
    }

    fn custom_config() -> Config {
        let mut config = Config::default();
        config.kp = 12;
        config.ki = 300;
        config.precharge_time = 20;
        config
    }

    fn saved_store() -> ConfigStore<RamStorage, SoftCrc16> {
        let mut store: ConfigStore<_, _> = ConfigStore::new(RamStorage::blank(), SoftCrc16);
        let mut config = custom_config();
        store
            .save(&mut config, &mut RecordingWatchdog::default())
            .unwrap();
        let (mut storage, crc) = store.release();
        storage.writes = [0; 8];
        ConfigStore::new(storage, crc)
    }

    #[test]
    fn test_save_writes_every_copy_under_paused_watchdog() {
        let mut store: ConfigStore<_, _> = ConfigStore::new(RamStorage::blank(), SoftCrc16);
        let mut watchdog = RecordingWatchdog::default();
        let mut config = custom_config();
        store.save(&mut config, &mut watchdog).unwrap();

        assert!(config.is_valid(&mut SoftCrc16));
        let (storage, _) = store.release();
        assert_eq!(&storage.writes[..4], &[1, 1, 1, 1]);
        assert_eq!(watchdog.pauses, 4);
        assert_eq!(watchdog.resumes, 4);
        assert!(watchdog.enabled);
    }

    #[test]
    fn test_load_all_valid_writes_nothing() {
        let mut store = saved_store();
        let report = store.load(&mut RecordingWatchdog::default());
        assert_eq!(report.source, LoadSource::Stored { index: 0 });
        assert_eq!(report.config.kp, 12);
        assert_eq!(report.invalid_mask, 0);
        let (storage, _) = store.release();
        assert_eq!(storage.writes, [0; 8]);
    }

    #[test]
    fn test_load_repairs_exactly_the_corrupted_copies() {
        let (mut storage, crc) = saved_store().release();
        storage.corrupt(0, 4); // CRC mismatch
        storage.corrupt(2, 0); // magic mismatch
        let mut store: ConfigStore<_, _> = ConfigStore::new(storage, crc);
        let mut watchdog = RecordingWatchdog::default();

        let report = store.load(&mut watchdog);
        assert_eq!(report.source, LoadSource::Stored { index: 1 });
        assert_eq!(report.config, custom_config_sealed());
        assert_eq!(report.invalid_mask, 0b0101);
        assert_eq!(report.repaired_mask, 0b0101);
        assert_eq!(watchdog.pauses, 2);

        let (storage, crc) = store.release();
        assert_eq!(&storage.writes[..4], &[1, 0, 1, 0]);

        // Every copy is good again
        let mut store: ConfigStore<_, _> = ConfigStore::new(storage, crc);
        let report = store.load(&mut RecordingWatchdog::default());
        assert_eq!(report.invalid_mask, 0);
    }

    fn custom_config_sealed() -> Config {
        let mut config = custom_config();
        config.seal(&mut SoftCrc16);
        config
    }

    #[test]
    fn test_load_adopts_first_valid_copy() {
        let (mut storage, crc) = saved_store().release();
        // Copy 3 holds a different but valid record
        let mut other = custom_config();
        other.kp = 99;
        other.seal(&mut SoftCrc16);
        storage.bytes[3 * CONFIG_RECORD_LEN..4 * CONFIG_RECORD_LEN]
            .copy_from_slice(&other.to_bytes());
        storage.corrupt(0, 10);
        let mut store: ConfigStore<_, _> = ConfigStore::new(storage, crc);

        let report = store.load(&mut RecordingWatchdog::default());
        assert_eq!(report.source, LoadSource::Stored { index: 1 });
        assert_eq!(report.config.kp, 12);
    }

    #[test]
    fn test_all_copies_bad_falls_back_to_defaults_without_writing() {
        let mut store: ConfigStore<_, _> = ConfigStore::new(RamStorage::blank(), SoftCrc16);
        let mut watchdog = RecordingWatchdog::default();
        let report = store.load(&mut watchdog);

        assert_eq!(report.source, LoadSource::Defaults);
        assert_eq!(report.config, Config::default());
        assert_eq!(report.invalid_mask, 0b1111);
        assert_eq!(watchdog.pauses, 0);
        let (storage, _) = store.release();
        assert_eq!(storage.writes, [0; 8]);
    }

    #[test]
    fn test_failed_repair_is_reported_and_watchdog_restored() {
        let (mut storage, crc) = saved_store().release();
        storage.corrupt(3, 20);
        storage.fail_writes = true;
        let mut store: ConfigStore<_, _> = ConfigStore::new(storage, crc);
        let mut watchdog = RecordingWatchdog::default();

        let report = store.load(&mut watchdog);
        assert_eq!(report.invalid_mask, 0b1000);
        assert_eq!(report.repaired_mask, 0);
        assert_eq!(watchdog.pauses, 1);
        assert!(watchdog.enabled);
    }

    #[test]
    fn test_region_larger_than_storage_is_rejected() {
        let mut store: ConfigStore<_, _, 8> =
            ConfigStore::with_base(RamStorage::blank(), SoftCrc16, 128);
        let mut config = Config::default();
        assert_eq!(
            store.save(&mut config, &mut RecordingWatchdog::default()),
            Err(StoreError::OutOfRange)
        );
    }

    #[test]
    fn test_single_copy_store() {
        let mut config = custom_config();
        let mut store: ConfigStore<_, _, 1> = ConfigStore::new(RamStorage::blank(), SoftCrc16);
        assert_eq!(store.copies(), 1);
        store
            .save(&mut config, &mut RecordingWatchdog::default())
            .unwrap();

        let report = store.load(&mut RecordingWatchdog::default());
        assert_eq!(report.source, LoadSource::Stored { index: 0 });
        assert_eq!(report.config.kp, 12);
        let (storage, _) = store.release();
        assert_eq!(storage.writes, [1, 0, 0, 0, 0, 0, 0, 0]);
    }
}
