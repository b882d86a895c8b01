//! TIM1 update interrupt
//!
//! Runs the control loop once per PWM period. The control loop and power
//! stage are handed over once and owned by the interrupt from then on;
//! thread mode reaches the live values only through [`SHARED`], whose
//! fields mask interrupts per access.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use cougar_drive::{ControlLoop, SharedState};
use cortex_m::peripheral::NVIC;
use embassy_stm32::pac;
use static_cell::StaticCell;

use crate::fmt::*;
use crate::power_stage::{init_pwm_timer, PwmStage};

/// Live values shared between the interrupt and the supervisor task
pub static SHARED: SharedState = SharedState::new();

/// TIM1 update priority; above every embassy-driven interrupt
const TIM1_PRIORITY: u8 = 0x20;

struct Realtime {
    control: ControlLoop,
    stage: PwmStage,
}

static REALTIME: StaticCell<Realtime> = StaticCell::new();

/// Set once by [`start`]; only the interrupt dereferences it.
static REALTIME_PTR: AtomicPtr<Realtime> = AtomicPtr::new(ptr::null_mut());

/// Hand the control loop and power stage to the interrupt and start PWM.
///
/// Call once.
pub fn start(control: ControlLoop, stage: PwmStage) {
    let realtime: &'static mut Realtime = REALTIME.init(Realtime { control, stage });
    REALTIME_PTR.store(realtime, Ordering::Release);

    unsafe {
        let mut cp = cortex_m::Peripherals::steal();
        cp.NVIC
            .set_priority(pac::Interrupt::TIM1_UP_TIM16, TIM1_PRIORITY);
        init_pwm_timer();
        NVIC::unmask(pac::Interrupt::TIM1_UP_TIM16);
    }
    info!("Control loop started");
}

/// # Safety
/// Interrupt context only.
#[inline(always)]
unsafe fn tim1_up_irq_handler() {
    let tim1 = pac::TIM1;
    if !tim1.sr().read().uif() {
        return;
    }
    tim1.sr().modify(|w| w.set_uif(false));

    // The handler does not preempt itself, so this is the only live
    // reference once `start` has stored the pointer.
    if let Some(rt) = REALTIME_PTR.load(Ordering::Acquire).as_mut() {
        rt.control.on_timer_overflow(&mut rt.stage, &SHARED);
    }
}

/// TIM1 update (shared with TIM16) vector
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM1_UP_TIM16() {
    tim1_up_irq_handler();
}
