//! Heatsink temperature cutback

use crate::config::params::{MAX_CURRENT_REF, THERMAL_CUTBACK_START, THERMAL_STEP_COUNTS};

/// Steps between the cutback start and zero current.
const CUTBACK_STEPS: u16 = 7;

/// Current reference ceiling for a raw heatsink reading.
///
/// Each step above [`THERMAL_CUTBACK_START`] removes one eighth of full
/// current; the seventh step and beyond allow none.
pub fn max_current_ref(raw_heatsink: u16) -> u16 {
    if raw_heatsink <= THERMAL_CUTBACK_START {
        return MAX_CURRENT_REF;
    }
    let step = (raw_heatsink - THERMAL_CUTBACK_START) / THERMAL_STEP_COUNTS;
    if step >= CUTBACK_STEPS {
        0
    } else {
        (CUTBACK_STEPS - step) * MAX_CURRENT_REF / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_current_when_cool() {
        assert_eq!(max_current_ref(0), 511);
        assert_eq!(max_current_ref(670), 511);
    }

    #[test]
    fn test_steps_down_to_zero() {
        assert_eq!(max_current_ref(671), 7 * 511 / 8);
        assert_eq!(max_current_ref(678), 6 * 511 / 8);
        assert_eq!(max_current_ref(670 + 6 * 8), 511 / 8);
        assert_eq!(max_current_ref(670 + 7 * 8), 0);
        assert_eq!(max_current_ref(1023), 0);
    }

    #[test]
    fn test_monotonic() {
        let mut last = u16::MAX;
        for raw in 0..=1023 {
            let limit = max_current_ref(raw);
            assert!(limit <= last);
            last = limit;
        }
    }
}
