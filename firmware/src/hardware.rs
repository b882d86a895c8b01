//! Board bring-up
//!
//! | signal | pin | notes |
//! |---|---|---|
//! | PWM | PA8 | TIM1_CH1, high side gate drive |
//! | throttle | PA0 | ADC1_IN1 |
//! | heatsink temp | PA1 | ADC1_IN2 |
//! | current feedback | PA2 | ADC1_IN3 |
//! | over-current trip | PB12 | low while the latch is tripped |
//! | over-current clear | PB13 | pulse low to reset the latch |
//! | status LED | PC6 | high = lit |
//! | contactor | PC7 | low = closed |
//! | console | PA9/PA10 | USART1, 19200 8N1 |

use cougar_drive::hardware::StatusOutputs;
use cougar_drive::timing::MillisClock;
use embassy_stm32::{bind_interrupts, gpio::Output, peripherals, usart, Config};
use embassy_time::Instant;

bind_interrupts!(pub struct Irqs {
    USART1 => usart::BufferedInterruptHandler<peripherals::USART1>;
});

/// Console baud rate.
pub const CONSOLE_BAUD: u32 = 19_200;

/// RCC clock tree
///
/// HSI → PLL (÷4 × 64 ÷ 2) = 128MHz, so TIM1 divides down to the
/// 15.625kHz PWM carrier exactly.
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL64,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// Console UART settings.
pub fn console_config() -> usart::Config {
    let mut config = usart::Config::default();
    config.baudrate = CONSOLE_BAUD;
    config
}

/// LED and contactor driver.
pub struct StatusPins {
    led: Output<'static>,
    contactor: Output<'static>,
}

impl StatusPins {
    /// `contactor` must have been created high (open).
    pub fn new(led: Output<'static>, contactor: Output<'static>) -> Self {
        Self { led, contactor }
    }
}

impl StatusOutputs for StatusPins {
    fn set_led(&mut self, lit: bool) {
        if lit {
            self.led.set_high();
        } else {
            self.led.set_low();
        }
    }

    fn toggle_led(&mut self) {
        self.led.toggle();
    }

    fn close_contactor(&mut self) {
        self.contactor.set_low();
    }
}

/// Millisecond clock on the embassy time driver.
///
/// Used where the control tick is not running yet (idle baseline) or may be
/// stalled behind a busy loop of our own (idle measurement).
#[derive(Clone, Copy, Default)]
pub struct UptimeClock;

impl MillisClock for UptimeClock {
    fn now_ms(&self) -> u16 {
        Instant::now().as_millis() as u16
    }
}
