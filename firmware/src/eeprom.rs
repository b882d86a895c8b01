//! Flash-backed EEPROM, CRC unit and watchdog
//!
//! The configuration copies live in the last flash page (page 63) of the
//! STM32G431VB. The page is rewritten as a whole through
//! [`RmwNorFlashStorage`], so each saved copy costs one page erase.

use cougar_drive::config::Crc16;
use cougar_drive::hardware::Watchdog;
#[cfg(feature = "image-crc")]
use cougar_drive::integrity::{verify_image, IntegrityError};
use embassy_stm32::{
    crc::{Config as CrcConfig, ConfigError, Crc, InputReverseConfig, PolySize},
    flash::{Blocking, Flash},
    peripherals,
    wdg::IndependentWatchdog,
};
use embedded_storage::nor_flash::RmwNorFlashStorage;

use crate::fmt::*;

/// Start of flash in the memory map
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Flash page size (2KB)
pub const FLASH_PAGE_SIZE: usize = 2048;

/// Offset of the last page (128KB - 2KB) from [`FLASH_BASE`]
pub const LAST_PAGE_OFFSET: u32 = 0x1F800;

/// Program CRC word, the last halfword below the configuration page.
#[cfg(feature = "image-crc")]
pub const IMAGE_CRC_OFFSET: u32 = LAST_PAGE_OFFSET - 2;

/// Watchdog timeout. Covers a 100ms idle measurement plus a page erase.
pub const WATCHDOG_TIMEOUT_US: u32 = 250_000;

/// Byte-addressable storage over the whole flash; offsets are from [`FLASH_BASE`].
pub type FlashEeprom = RmwNorFlashStorage<'static, Flash<'static, Blocking>>;

pub fn flash_eeprom(
    flash: Flash<'static, Blocking>,
    merge_buffer: &'static mut [u8; FLASH_PAGE_SIZE],
) -> FlashEeprom {
    info!("Config page at 0x{:08X}", FLASH_BASE + LAST_PAGE_OFFSET);
    RmwNorFlashStorage::new(flash, merge_buffer)
}

/// CRC-16/MCRF4XX settings for the CRC unit: poly 0x1021 fed LSB first,
/// reflected result, seed 0xFFFF.
pub fn crc16_config() -> Result<CrcConfig, ConfigError> {
    CrcConfig::new(
        InputReverseConfig::Byte,
        true, // reverse_out
        PolySize::Width16,
        0xFFFF, // crc_init_value
        0x1021, // crc_poly
    )
}

/// [`Crc16`] on the CRC peripheral.
pub struct HwCrc16 {
    crc: Crc<'static>,
}

impl HwCrc16 {
    /// `crc` must have been configured with [`crc16_config`].
    pub fn new(crc: Crc<'static>) -> Self {
        Self { crc }
    }
}

impl Crc16 for HwCrc16 {
    fn checksum(&mut self, data: &[u8]) -> u16 {
        self.crc.reset();
        self.crc.feed_bytes(data) as u16
    }
}

/// Independent watchdog.
///
/// The IWDG cannot be stopped once started, so pausing it around flash
/// writes only feeds it; the timeout is long enough for a page erase.
pub struct Iwdg {
    wdg: IndependentWatchdog<'static, peripherals::IWDG>,
}

impl Iwdg {
    /// Start the watchdog.
    pub fn start(mut wdg: IndependentWatchdog<'static, peripherals::IWDG>) -> Self {
        wdg.unleash();
        info!("Watchdog running, timeout {}us", WATCHDOG_TIMEOUT_US);
        Self { wdg }
    }
}

impl Watchdog for Iwdg {
    fn feed(&mut self) {
        self.wdg.pet();
    }

    fn disable(&mut self) {
        self.wdg.pet();
    }

    fn enable(&mut self) {
        self.wdg.pet();
    }
}

/// Check the program image against its stored CRC word.
#[cfg(feature = "image-crc")]
pub fn check_image(crc: &mut impl Crc16) -> Result<(), IntegrityError> {
    let image = unsafe {
        core::slice::from_raw_parts(FLASH_BASE as *const u8, IMAGE_CRC_OFFSET as usize)
    };
    let stored =
        unsafe { core::ptr::read_volatile((FLASH_BASE + IMAGE_CRC_OFFSET) as *const u16) };
    verify_image(image, stored, crc)
}
