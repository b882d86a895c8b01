//! Cross-context access primitives
//!
//! The control pipeline runs in the timer interrupt while housekeeping and
//! the console run in thread mode. Every scalar that crosses the two is held
//! in a [`Guarded`] cell: each read or write masks interrupts for the
//! duration of one copy and nothing longer.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Interrupt-masked accessor for one `Copy` value.
///
/// The critical section is never held across two cells. Multi-field views
/// (see `snapshot`) are assembled field by field.
pub struct Guarded<T: Copy> {
    inner: Mutex<CriticalSectionRawMutex, Cell<T>>,
}

impl<T: Copy> Guarded<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Copy the value out with interrupts masked.
    #[inline]
    pub fn get(&self) -> T {
        self.inner.lock(|cell| cell.get())
    }

    /// Store a new value with interrupts masked.
    #[inline]
    pub fn set(&self, value: T) {
        self.inner.lock(|cell| cell.set(value));
    }

    /// Read-modify-write inside a single critical section.
    ///
    /// # Returns
    /// The value that was stored.
    #[inline]
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        self.inner.lock(|cell| {
            let next = f(cell.get());
            cell.set(next);
            next
        })
    }
}

/// Re-entrancy guard for the regulator.
///
/// Only the interrupt context writes it, so a plain swap is enough.
pub struct BusyFlag {
    busy: AtomicBool,
}

impl BusyFlag {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Run `f` unless a previous invocation is still executing.
    ///
    /// # Returns
    /// `None` when the invocation was skipped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _entered = self.try_enter()?;
        Some(f())
    }

    /// Mark the flag busy until the returned guard is dropped.
    pub fn try_enter(&self) -> Option<BusyGuard<'_>> {
        if self.busy.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(BusyGuard { flag: self })
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

impl Default for BusyFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the [`BusyFlag`] on drop.
pub struct BusyGuard<'a> {
    flag: &'a BusyFlag,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_update_returns_stored_value() {
        let cell = Guarded::new(5u16);
        assert_eq!(cell.update(|v| v + 3), 8);
        assert_eq!(cell.get(), 8);
        cell.set(1);
        assert_eq!(cell.get(), 1);
    }

    #[test]
    fn test_busy_flag_skips_nested_invocation() {
        let flag = BusyFlag::new();
        let outer = flag.run(|| {
            assert!(flag.is_busy());
            flag.run(|| 1u8)
        });
        assert_eq!(outer, Some(None));
        assert!(!flag.is_busy());
        assert_eq!(flag.run(|| 2u8), Some(2));
    }
}
