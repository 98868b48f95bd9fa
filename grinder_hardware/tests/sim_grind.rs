use std::sync::Arc;
use std::time::Duration;

use grinder_hardware::sim::{SimParams, SimulatedGrinder};
use grinder_traits::{Esc, ManualClock, Motor, Scale};
use rstest::rstest;

#[rstest]
#[case(5_000, 1.0)]
#[case(10_000, 2.0)]
#[case(20_000, 2.0)]
fn stepper_rate_maps_to_delivery(#[case] sps: u32, #[case] expected_g: f32) {
    let clock = ManualClock::new();
    let grinder = SimulatedGrinder::with_clock(SimParams::default(), Arc::new(clock.clone()));
    let mut motor = grinder.motor();
    motor.set_speed(sps).unwrap();
    motor.start().unwrap();
    clock.advance_ms(1000);
    assert!((grinder.mass_g() - expected_g).abs() < 1e-3, "mass {}", grinder.mass_g());
}

#[test]
fn esc_stop_halts_delivery_and_scale_tracks_mass() {
    let clock = ManualClock::new();
    let grinder = SimulatedGrinder::with_clock(SimParams::default(), Arc::new(clock.clone()));
    let mut esc = grinder.esc();
    let mut scale = grinder.scale();
    let zero = scale.read(Duration::from_millis(5)).unwrap();

    esc.set_pulse_us(2000).unwrap();
    clock.advance_ms(1000);
    esc.stop().unwrap();
    clock.advance_ms(1000);

    let raw = scale.read(Duration::from_millis(5)).unwrap();
    let grams = (raw - zero) as f32 / SimParams::default().counts_per_gram;
    assert!((grams - 2.0).abs() < 0.01, "grams {grams}");
}
