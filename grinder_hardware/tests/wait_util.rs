use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use grinder_hardware::error::HwError;
use grinder_hardware::util::{pulse_to_fraction, wait_until_low_with_timeout};
use rstest::rstest;

#[test]
fn data_ready_seen_after_a_few_polls() {
    let polls = AtomicU32::new(0);
    let res = wait_until_low_with_timeout(
        || polls.fetch_add(1, Ordering::Relaxed) < 3,
        Duration::from_millis(100),
        Duration::from_micros(100),
    );
    assert!(res.is_ok(), "{res:?}");
    assert_eq!(polls.load(Ordering::Relaxed), 4);
}

#[test]
fn data_ready_from_another_thread() {
    let dt_high = Arc::new(AtomicBool::new(true));
    let bg = Arc::clone(&dt_high);
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(2));
        bg.store(false, Ordering::Release);
    });
    let res = wait_until_low_with_timeout(
        || dt_high.load(Ordering::Acquire),
        Duration::from_millis(500),
        Duration::from_micros(200),
    );
    t.join().unwrap();
    assert!(res.is_ok(), "{res:?}");
}

#[test]
fn stuck_high_line_is_a_data_ready_timeout() {
    let started = Instant::now();
    let err = wait_until_low_with_timeout(|| true, Duration::from_millis(5), Duration::from_micros(200))
        .unwrap_err();
    assert!(matches!(err, HwError::DataReadyTimeout), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(5));
    assert!(err.to_string().contains("timeout"));
}

#[rstest]
#[case(1500, 0.0)]
#[case(2000, 1.0)]
#[case(1000, -1.0)]
#[case(1600, 0.2)]
#[case(1400, -0.2)]
#[case(2500, 1.0)]
#[case(900, -1.0)]
fn esc_pulse_maps_to_signed_fraction(#[case] pulse: u16, #[case] expected: f32) {
    let got = pulse_to_fraction(pulse, 1500, 2000, 1000);
    assert!((got - expected).abs() < 1e-6, "{pulse} us -> {got}");
}

#[test]
fn asymmetric_esc_ranges_scale_independently() {
    // 1500 neutral, 1900 full forward, 1300 full reverse.
    assert!((pulse_to_fraction(1700, 1500, 1900, 1300) - 0.5).abs() < 1e-6);
    assert!((pulse_to_fraction(1400, 1500, 1900, 1300) + 0.5).abs() < 1e-6);
}
