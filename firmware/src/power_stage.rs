//! TIM1 PWM, ADC1 and over-current latch
//!
//! TIM1 counts center aligned from the 128MHz kernel clock with PSC=7 and
//! ARR=511 (1023 for `pwm-8k`), i.e. 15.625kHz (7.8125kHz). The repetition
//! counter is set so the update interrupt fires once per carrier period, at
//! the bottom of the count where the output is off.
//!
//! The interrupt path talks to the ADC registers directly: one regular
//! conversion is started per slot and collected on the next. The embassy
//! driver is only used for power-up calibration and blocking reads.

use cougar_drive::hardware::{AnalogChannel, PowerStage};
use embassy_stm32::{
    adc::{Adc, AnyAdcChannel, SampleTime},
    gpio::{Input, Output},
    pac, peripherals,
};

use crate::fmt::*;

/// TIM1 prescaler (128MHz / 8 = 16MHz counter clock)
const PWM_PRESCALER: u16 = 7;

/// TIM1 auto-reload; the duty register runs 0..=ARR
#[cfg(not(feature = "pwm-8k"))]
pub const PWM_TOP: u16 = 511;
#[cfg(feature = "pwm-8k")]
pub const PWM_TOP: u16 = 1023;

/// ADC1 input numbers for PA0..PA2
const fn adc_input(channel: AnalogChannel) -> u8 {
    match channel {
        AnalogChannel::Throttle => 1,
        AnalogChannel::HeatsinkTemp => 2,
        AnalogChannel::CurrentFeedback => 3,
    }
}

/// 12-bit converter result to the 10-bit counts the control core works in.
#[inline(always)]
const fn to_counts(raw: u16) -> u16 {
    (raw & 0x0fff) >> 2
}

/// Analog pins in [`AnalogChannel`] order.
pub struct AnalogPins {
    pub throttle: AnyAdcChannel<peripherals::ADC1>,
    pub heatsink: AnyAdcChannel<peripherals::ADC1>,
    pub current: AnyAdcChannel<peripherals::ADC1>,
}

pub struct PwmStage {
    adc: Adc<'static, peripherals::ADC1>,
    pins: AnalogPins,
    oc_trip: Input<'static>,
    oc_clear: Output<'static>,
}

impl PwmStage {
    /// `oc_clear` must have been created high (released).
    pub fn new(
        mut adc: Adc<'static, peripherals::ADC1>,
        pins: AnalogPins,
        oc_trip: Input<'static>,
        oc_clear: Output<'static>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES47_5);
        Self {
            adc,
            pins,
            oc_trip,
            oc_clear,
        }
    }
}

impl PowerStage for PwmStage {
    #[inline]
    fn read_conversion(&mut self) -> u16 {
        let adc = pac::ADC1;
        let raw = adc.dr().read().rdata();
        adc.isr().write(|w| w.set_eoc(true));
        to_counts(raw)
    }

    #[inline]
    fn start_conversion(&mut self, channel: AnalogChannel) {
        let adc = pac::ADC1;
        adc.sqr1().modify(|w| {
            w.set_l(0);
            w.set_sq(0, adc_input(channel));
        });
        adc.cr().modify(|w| w.set_adstart(true));
    }

    fn convert_blocking(&mut self, channel: AnalogChannel) -> u16 {
        let pin = match channel {
            AnalogChannel::Throttle => &mut self.pins.throttle,
            AnalogChannel::HeatsinkTemp => &mut self.pins.heatsink,
            AnalogChannel::CurrentFeedback => &mut self.pins.current,
        };
        to_counts(self.adc.blocking_read(pin))
    }

    #[inline]
    fn overcurrent_tripped(&mut self) -> bool {
        self.oc_trip.is_low()
    }

    fn pulse_overcurrent_clear(&mut self) {
        self.oc_clear.set_low();
        // ~500ns at 128MHz
        cortex_m::asm::delay(64);
        self.oc_clear.set_high();
    }

    #[inline]
    fn write_duty(&mut self, register: u16) {
        pac::TIM1.ccr(0).write(|w| w.set_ccr(register.min(PWM_TOP)));
    }
}

/// TIM1 center-aligned PWM on PA8 with the update interrupt enabled.
///
/// The output starts at zero duty. NVIC is left to [`crate::isr::start`].
///
/// # Safety
/// Direct register access. TIM1 and PA8 must not be owned by any embassy
/// driver.
pub unsafe fn init_pwm_timer() {
    let rcc = pac::RCC;
    let tim1 = pac::TIM1;
    let gpioa = pac::GPIOA;

    rcc.ahb2enr().modify(|w| w.set_gpioaen(true));
    rcc.apb2enr().modify(|w| w.set_tim1en(true));

    // PA8: TIM1_CH1, AF6
    gpioa
        .moder()
        .modify(|w| w.set_moder(8, pac::gpio::vals::Moder::ALTERNATE));
    gpioa.afr(1).modify(|w| w.set_afr(0, 6));
    gpioa
        .ospeedr()
        .modify(|w| w.set_ospeedr(8, pac::gpio::vals::Ospeedr::HIGH_SPEED));

    // CMS only changes while the counter is stopped
    tim1.cr1().modify(|w| {
        w.set_cen(false);
        w.set_cms(pac::timer::vals::Cms::CENTER_ALIGNED1);
        w.set_arpe(true);
    });
    tim1.psc().write_value(PWM_PRESCALER);
    tim1.arr().write_value(pac::timer::regs::ArrCore(PWM_TOP as u32));
    // one update per period: underflow only
    tim1.rcr().write(|w| w.set_rep(1));
    tim1.ccr(0).write(|w| w.set_ccr(0));

    tim1.ccmr_output(0).modify(|w| {
        w.set_ocm(0, pac::timer::vals::Ocm::PWM_MODE1);
        w.set_ocpe(0, true);
    });
    tim1.ccer().modify(|w| {
        w.set_cce(0, true);
        w.set_ccp(0, false);
    });
    tim1.bdtr().modify(|w| w.set_moe(true));
    tim1.dier().modify(|w| w.set_uie(true));

    tim1.cnt().write_value(pac::timer::regs::CntCore(0));
    tim1.sr().write(|w| w.0 = 0);
    tim1.egr().write(|w| w.set_ug(true));

    tim1.cr1().modify(|w| {
        w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY);
        w.set_cen(true);
    });

    info!("TIM1 PWM running: top={} psc={}", PWM_TOP, PWM_PRESCALER);
}
