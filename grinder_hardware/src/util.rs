use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Poll `is_high` until the line drops (HX711 data ready) or `timeout` passes.
pub fn wait_until_low_with_timeout(
    mut is_high: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while is_high() {
        if Instant::now() >= deadline {
            return Err(HwError::DataReadyTimeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

/// Map a servo pulse width onto a signed fraction of full throttle around `neutral_us`.
///
/// Pulses above neutral map to `(0, 1]` using `forward_max_us`, pulses below map
/// to `[-1, 0)` using `reverse_max_us`. Out-of-range pulses saturate.
pub fn pulse_to_fraction(pulse_us: u16, neutral_us: u16, forward_max_us: u16, reverse_max_us: u16) -> f32 {
    let p = f32::from(pulse_us);
    let n = f32::from(neutral_us);
    if pulse_us >= neutral_us {
        let span = f32::from(forward_max_us.saturating_sub(neutral_us)).max(1.0);
        ((p - n) / span).clamp(0.0, 1.0)
    } else {
        let span = f32::from(neutral_us.saturating_sub(reverse_max_us)).max(1.0);
        -((n - p) / span).clamp(0.0, 1.0)
    }
}
