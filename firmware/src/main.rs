#![no_std]
#![no_main]

mod eeprom;
mod fmt;
mod hardware;
mod isr;
mod power_stage;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use cougar_drive::config::params::IDLE_WINDOW_MS;
use cougar_drive::config::ConfigStore;
use cougar_drive::timing::IdleMeter;
use cougar_drive::{prepare_power_stage, ControlLoop, Supervisor};
use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel},
    crc::Crc,
    flash::Flash,
    gpio::{Input, Level, Output, Pull, Speed},
    usart::BufferedUart,
    wdg::IndependentWatchdog,
};
use static_cell::StaticCell;

use eeprom::{HwCrc16, Iwdg, FLASH_PAGE_SIZE, LAST_PAGE_OFFSET, WATCHDOG_TIMEOUT_US};
use fmt::*;
use hardware::{Irqs, StatusPins, UptimeClock};
use isr::SHARED;
use power_stage::{AnalogPins, PwmStage};
use tasks::console_task;

static MERGE_BUFFER: StaticCell<[u8; FLASH_PAGE_SIZE]> = StaticCell::new();
static UART_TX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 64]> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("Cougar DC motor controller, STM32G431VB @ 128MHz");

    let Ok(crc_config) = eeprom::crc16_config() else {
        error!("CRC unit rejected the CRC-16 settings");
        halt();
    };
    let crc = HwCrc16::new(Crc::new(p.CRC, crc_config));

    #[cfg(feature = "image-crc")]
    let crc = {
        let mut crc = crc;
        if eeprom::check_image(&mut crc).is_err() {
            halt();
        }
        crc
    };

    // outputs to their safe levels before anything else runs
    let led = Output::new(p.PC6, Level::Low, Speed::Low);
    let contactor = Output::new(p.PC7, Level::High, Speed::Low);
    let oc_clear = Output::new(p.PB13, Level::High, Speed::Low);
    let oc_trip = Input::new(p.PB12, Pull::Up);

    // loop-count baseline while nothing else competes for the CPU
    let idle = IdleMeter::calibrate(&UptimeClock, IDLE_WINDOW_MS);
    info!("Idle baseline: {} loops / {}ms", idle.baseline(), IDLE_WINDOW_MS);

    let watchdog = Iwdg::start(IndependentWatchdog::new(p.IWDG, WATCHDOG_TIMEOUT_US));

    let flash = Flash::new_blocking(p.FLASH);
    let storage = eeprom::flash_eeprom(flash, MERGE_BUFFER.init([0; FLASH_PAGE_SIZE]));
    let store = ConfigStore::with_base(storage, crc, LAST_PAGE_OFFSET);
    let supervisor = Supervisor::start(&SHARED, store, watchdog, idle);

    let pins = AnalogPins {
        throttle: p.PA0.degrade_adc(),
        heatsink: p.PA1.degrade_adc(),
        current: p.PA2.degrade_adc(),
    };
    let mut stage = PwmStage::new(Adc::new(p.ADC1), pins, oc_trip, oc_clear);
    let zero_offset = prepare_power_stage(&SHARED, &mut stage);
    info!("Faults at start: 0x{:02X}", SHARED.faults.get().bits());

    isr::start(ControlLoop::new(zero_offset), stage);

    let uart = match BufferedUart::new(
        p.USART1,
        p.PA10,
        p.PA9,
        UART_TX_BUF.init([0; 256]),
        UART_RX_BUF.init([0; 64]),
        Irqs,
        hardware::console_config(),
    ) {
        Ok(uart) => uart,
        Err(_) => {
            error!("USART1 configuration failed");
            halt();
        }
    };

    spawner
        .spawn(console_task(uart, supervisor, StatusPins::new(led, contactor)))
        .unwrap();
}

/// Park the CPU for good. The watchdog, if running, resets the MCU.
fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
