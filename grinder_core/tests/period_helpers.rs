use grinder_core::util::{ms_to_ticks, period_ms, period_us};

#[test]
fn period_us_clamps_and_floors() {
    assert_eq!(period_us(1), 1_000_000);
    assert_eq!(period_us(1000), 1000);
    assert_eq!(period_us(0), 1_000_000);
    assert_eq!(period_us(u32::MAX), 1);
}

#[test]
fn period_ms_has_one_ms_floor() {
    assert_eq!(period_ms(10), 100);
    assert_eq!(period_ms(100), 10);
    assert_eq!(period_ms(1000), 1);
    assert_eq!(period_ms(10_000), 1);
}

#[test]
fn kick_dwell_in_ticks() {
    assert_eq!(ms_to_ticks(150, 1000), 150);
    assert_eq!(ms_to_ticks(150, 100), 15);
    assert_eq!(ms_to_ticks(1, 100), 1);
    assert_eq!(ms_to_ticks(0, 1000), 0);
}
