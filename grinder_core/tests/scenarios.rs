use std::sync::Arc;

use grinder_core::{
    ActuatorCommand, Button, ButtonEvent, ControllerCfg, GrindController, GrinderError, InputCfg,
    InputClassifier, MachineState, MemoryStore, PersistedState, PresetId, PresetStore,
    RemoteCommand, StallPolicy,
};
use grinder_traits::ManualClock;
use rstest::rstest;

/// Raw counts per gram used by every rig.
const CPG: f32 = 100.0;

struct Rig {
    clock: ManualClock,
    store: MemoryStore,
    ctl: GrindController<MemoryStore>,
}

impl Rig {
    fn new(cfg: ControllerCfg) -> Self {
        Self::with_state(
            cfg,
            PersistedState {
                scale_factor: CPG,
                ..PersistedState::default()
            },
        )
    }

    fn with_state(cfg: ControllerCfg, state: PersistedState) -> Self {
        let clock = ManualClock::new();
        let store = MemoryStore::with_state(state);
        let mut ctl = GrindController::new(cfg, store.clone(), Arc::new(clock.clone())).unwrap();
        // Empty platform; the first sample becomes the zero point.
        ctl.on_sample(0);
        Self { clock, store, ctl }
    }

    fn weigh(&mut self, grams: f32) {
        self.ctl.on_sample((grams * CPG).round() as i32);
    }

    fn step(&mut self, ms: u64) -> ActuatorCommand {
        self.clock.advance_ms(ms);
        self.ctl.tick()
    }

    fn press(&mut self, b: Button) {
        self.ctl.handle_input(ButtonEvent::press(b));
    }

    fn hold(&mut self, b: Button) {
        self.ctl.handle_input(ButtonEvent::hold(b));
    }

    fn state(&self) -> MachineState {
        self.ctl.state()
    }
}

fn fail_fast() -> ControllerCfg {
    let mut cfg = ControllerCfg::default();
    cfg.stall.policy = StallPolicy::FailFast;
    cfg
}

fn grind_error(e: &eyre::Report) -> &GrinderError {
    e.downcast_ref::<GrinderError>().unwrap()
}

fn record(rig: &Rig, seen: &mut Vec<MachineState>) {
    if seen.last() != Some(&rig.state()) {
        seen.push(rig.state());
    }
}

#[test]
fn scenario_a_small_preset_completes_and_counts() {
    let mut rig = Rig::new(ControllerCfg::default());
    let mut seen = vec![rig.state()];

    rig.press(Button::Start);
    record(&rig, &mut seen);
    assert_eq!(rig.step(100), ActuatorCommand::Forward(0.8));

    rig.weigh(5.0);
    assert_eq!(rig.step(100), ActuatorCommand::Forward(0.8));

    // Within a gram of the target the controller asks for half speed.
    rig.weigh(7.5);
    assert_eq!(rig.step(100), ActuatorCommand::Forward(0.4));

    rig.weigh(8.0);
    assert_eq!(rig.step(100), ActuatorCommand::Stop);
    record(&rig, &mut seen);

    for _ in 0..40 {
        rig.step(100);
        record(&rig, &mut seen);
    }

    assert_eq!(
        seen,
        vec![
            MachineState::Idle,
            MachineState::Running,
            MachineState::Measuring,
            MachineState::Finished,
            MachineState::Saving,
            MachineState::Idle,
        ]
    );
    let stored = rig.store.stored().unwrap();
    assert_eq!(stored.small_runs, 1);
    assert_eq!(stored.large_runs, 0);
    assert!((stored.total_weight_g - 8.0).abs() < 1e-4);
}

#[test]
fn saving_dwell_does_not_block_tick() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(8.2);
    rig.step(100);
    assert_eq!(rig.state(), MachineState::Measuring);
    rig.step(500);
    assert_eq!(rig.state(), MachineState::Finished);
    rig.step(100);
    assert_eq!(rig.state(), MachineState::Saving);
    rig.step(1000);
    assert_eq!(rig.state(), MachineState::Saving);
    rig.step(1000);
    assert_eq!(rig.state(), MachineState::Idle);
}

#[test]
fn scenario_b_reverse_retry_then_empty() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(1.0);

    let mut reversals = 0;
    let mut prev = ActuatorCommand::Stop;
    for _ in 0..200 {
        let cmd = rig.step(100);
        if matches!(cmd, ActuatorCommand::Reverse(_)) && !matches!(prev, ActuatorCommand::Reverse(_)) {
            reversals += 1;
        }
        prev = cmd;
        if rig.state() == MachineState::Empty {
            break;
        }
    }
    assert_eq!(rig.state(), MachineState::Empty);
    assert_eq!(reversals, 3);
    assert_eq!(rig.ctl.actuator_command(), ActuatorCommand::Stop);
}

#[test]
fn progress_resets_reverse_attempts() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.step(100);
    for _ in 0..21 {
        rig.step(100);
    }
    assert_eq!(rig.ctl.reverse_attempts(), 1);
    assert!(matches!(rig.ctl.actuator_command(), ActuatorCommand::Reverse(_)));

    for _ in 0..6 {
        rig.step(100);
    }
    rig.weigh(0.5);
    assert_eq!(rig.ctl.reverse_attempts(), 0);
    assert!(matches!(rig.step(100), ActuatorCommand::Forward(_)));
}

#[test]
fn empty_is_not_retried_automatically() {
    let mut rig = Rig::new(fail_fast());
    rig.press(Button::Start);
    for _ in 0..25 {
        rig.step(100);
    }
    assert_eq!(rig.state(), MachineState::Empty);
    for _ in 0..50 {
        assert_eq!(rig.step(100), ActuatorCommand::Stop);
    }
    assert_eq!(rig.state(), MachineState::Empty);

    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Running);
    assert!(matches!(rig.step(100), ActuatorCommand::Forward(_)));
}

#[test]
fn liveness_stall_reaches_empty_within_timeout_plus_one_period() {
    let cfg = fail_fast();
    let timeout = cfg.stall.timeout_ms;
    let mut rig = Rig::new(cfg);
    rig.press(Button::Start);
    let mut elapsed = 0;
    while rig.state() == MachineState::Running {
        rig.step(100);
        elapsed += 100;
        assert!(elapsed <= timeout + 100, "still running after {elapsed} ms");
    }
    assert_eq!(rig.state(), MachineState::Empty);
}

#[test]
fn liveness_target_reached_finishes_in_bounded_ticks() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(9.0);
    let mut ticks = 0;
    while rig.state() != MachineState::Finished {
        rig.step(100);
        ticks += 1;
        assert!(ticks <= 7, "not finished after {ticks} ticks");
    }
}

#[test]
fn measuring_regression_resumes_running() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(8.0);
    rig.step(100);
    assert_eq!(rig.state(), MachineState::Measuring);
    rig.weigh(7.8);
    rig.step(300);
    assert_eq!(rig.state(), MachineState::Measuring);
    let cmd = rig.step(300);
    assert_eq!(rig.state(), MachineState::Running);
    assert_eq!(cmd, ActuatorCommand::Forward(0.4));
}

#[test]
fn scenario_c_hold_left_then_adjust() {
    let mut rig = Rig::new(ControllerCfg::default());
    let mut input = InputClassifier::new(&InputCfg::default());
    for t in (0..=2100).step_by(10) {
        if let Some(ev) = input.sample(Button::Left, true, t) {
            rig.ctl.handle_input(ev);
        }
    }
    for t in (2110..=2300).step_by(10) {
        if let Some(ev) = input.sample(Button::Left, false, t) {
            rig.ctl.handle_input(ev);
        }
    }
    assert_eq!(rig.state(), MachineState::SetLeft);

    for _ in 0..3 {
        rig.press(Button::Right);
    }
    assert_eq!(rig.ctl.preset_dg(PresetId::Small), 83);
    rig.press(Button::Left);
    assert_eq!(rig.ctl.preset_dg(PresetId::Small), 82);

    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Saving);
    assert_eq!(rig.store.stored().unwrap().small_dg, 82);
}

#[rstest]
#[case(PresetId::Large, 299, Button::Right, 300)]
#[case(PresetId::Small, 2, Button::Left, 1)]
fn set_mode_clamps_at_bounds(
    #[case] id: PresetId,
    #[case] initial: u16,
    #[case] button: Button,
    #[case] expected: u16,
) {
    let mut state = PersistedState {
        scale_factor: CPG,
        ..PersistedState::default()
    };
    match id {
        PresetId::Small => state.small_dg = initial,
        PresetId::Large => state.large_dg = initial,
    }
    let mut rig = Rig::with_state(ControllerCfg::default(), state);
    rig.hold(match id {
        PresetId::Small => Button::Left,
        PresetId::Large => Button::Right,
    });
    for _ in 0..3 {
        rig.press(button);
    }
    assert_eq!(rig.ctl.preset_dg(id), expected);
}

#[test]
fn scenario_d_remote_target_is_clamped() {
    let mut rig = Rig::new(ControllerCfg::default());
    let before = rig.store.saves();
    rig.ctl
        .handle_command(RemoteCommand::SetPresetTarget(PresetId::Large, 350))
        .unwrap();
    assert_eq!(rig.ctl.preset_dg(PresetId::Large), 300);
    assert_eq!(rig.store.stored().unwrap().large_dg, 300);
    assert_eq!(rig.store.saves(), before + 1);
    assert_eq!(rig.state(), MachineState::Idle);
}

#[rstest]
#[case(f32::NAN)]
#[case(-0.1)]
#[case(5.5)]
#[case(f32::INFINITY)]
fn invalid_stall_threshold_is_rejected(#[case] g: f32) {
    let mut rig = Rig::new(ControllerCfg::default());
    let before = rig.ctl.stall_threshold_g();
    let err = rig
        .ctl
        .handle_command(RemoteCommand::SetStallThreshold(g))
        .unwrap_err();
    assert!(matches!(grind_error(&err), GrinderError::InvalidCommand(_)));
    assert_eq!(rig.ctl.stall_threshold_g(), before);
    assert_eq!(rig.state(), MachineState::Idle);
}

#[test]
fn remote_start_swallows_one_start_press() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Start).unwrap();
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Running);
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Paused);
}

#[test]
fn remote_start_suppression_ends_after_first_tick() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Start).unwrap();
    rig.step(100);
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Paused);
}

#[test]
fn remote_start_suppression_can_be_disabled() {
    let mut cfg = ControllerCfg::default();
    cfg.control.suppress_release_after_remote_start = false;
    let mut rig = Rig::new(cfg);
    rig.ctl.handle_command(RemoteCommand::Start).unwrap();
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Paused);
}

#[test]
fn start_with_preset_selects_persists_and_runs() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl
        .handle_command(RemoteCommand::StartWithPreset(PresetId::Large))
        .unwrap();
    assert_eq!(rig.state(), MachineState::Running);
    assert_eq!(rig.ctl.remaining_dg(), 120);
    assert_eq!(rig.store.stored().unwrap().selected, 1);
}

#[test]
fn start_rejected_while_running() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    let err = rig.ctl.handle_command(RemoteCommand::Start).unwrap_err();
    assert!(matches!(grind_error(&err), GrinderError::State(_)));
    let err = rig.ctl.handle_command(RemoteCommand::Tare).unwrap_err();
    assert!(matches!(grind_error(&err), GrinderError::State(_)));
}

#[test]
fn pause_resume_keeps_weight_and_preset_switch_returns_idle() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(3.0);
    rig.step(100);
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Paused);
    assert_eq!(rig.step(100), ActuatorCommand::Stop);

    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Running);
    assert!((rig.ctl.current_weight_g() - 3.0).abs() < 1e-4, "no re-tare on resume");

    rig.press(Button::Start);
    rig.press(Button::Right);
    assert_eq!(rig.state(), MachineState::Idle);
    assert_eq!(rig.ctl.selected(), PresetId::Large);
    assert_eq!(rig.ctl.remaining_dg(), 120);
    assert_eq!(rig.store.stored().unwrap().selected, 1);
}

#[test]
fn idle_preset_press_selects_and_tares() {
    let mut rig = Rig::new(ControllerCfg::default());
    for _ in 0..10 {
        rig.weigh(2.0);
    }
    rig.press(Button::Right);
    assert_eq!(rig.ctl.selected(), PresetId::Large);
    assert_eq!(rig.ctl.current_weight_g(), 0.0);
    assert_eq!(rig.store.stored().unwrap().selected, 1);
}

#[test]
fn weighing_mode_tares_and_exits_on_hold() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.hold(Button::Start);
    assert_eq!(rig.state(), MachineState::Weighing);
    for _ in 0..10 {
        rig.weigh(3.0);
    }
    assert!((rig.ctl.current_weight_g() - 3.0).abs() < 1e-4);
    rig.press(Button::Start);
    assert_eq!(rig.ctl.current_weight_g(), 0.0);
    assert_eq!(rig.step(100), ActuatorCommand::Stop);
    rig.hold(Button::Start);
    assert_eq!(rig.state(), MachineState::Idle);
}

#[test]
fn calibration_computes_factor_from_known_weight() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Calibrate).unwrap();
    assert_eq!(rig.state(), MachineState::Calibrate);
    rig.press(Button::Start);
    // 10.92 g reference at 200 counts per gram
    for _ in 0..9 {
        rig.ctl.on_sample(2184);
    }
    assert_eq!(rig.state(), MachineState::Calibrate);
    rig.ctl.on_sample(2184);
    assert_eq!(rig.state(), MachineState::Saving);
    assert!((rig.ctl.scale_factor() - 200.0).abs() < 1e-3);
    assert!((rig.store.stored().unwrap().scale_factor - 200.0).abs() < 1e-3);
}

#[test]
fn calibration_with_zero_reading_is_rejected() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Calibrate).unwrap();
    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Calibrate);
    for _ in 0..10 {
        rig.ctl.on_sample(0);
    }
    assert_eq!(rig.state(), MachineState::Calibrate);
    assert_eq!(rig.ctl.scale_factor(), CPG);
}

#[test]
fn calibration_ignores_readings_from_before_the_press() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Calibrate).unwrap();
    // Reference weight still being set down.
    for raw in [400, 1_000, 1_800, 2_300, 2_184] {
        rig.ctl.on_sample(raw);
    }
    rig.press(Button::Start);
    for _ in 0..10 {
        rig.ctl.on_sample(2184);
    }
    assert_eq!(rig.state(), MachineState::Saving);
    assert!((rig.ctl.scale_factor() - 200.0).abs() < 1e-3);
}

#[test]
fn calibration_skips_a_glitch_inside_the_window() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Calibrate).unwrap();
    rig.press(Button::Start);
    for _ in 0..5 {
        rig.ctl.on_sample(2184);
    }
    rig.ctl.on_sample(8_000_000);
    for _ in 0..4 {
        rig.ctl.on_sample(2184);
    }
    assert_eq!(rig.state(), MachineState::Calibrate);
    rig.ctl.on_sample(2184);
    assert_eq!(rig.state(), MachineState::Saving);
    assert!((rig.ctl.scale_factor() - 200.0).abs() < 1e-3);
}

#[test]
fn cup_placed_just_before_start_is_tared_away() {
    let mut rig = Rig::new(ControllerCfg::default());
    for _ in 0..6 {
        rig.weigh(0.0);
    }
    for _ in 0..4 {
        rig.weigh(200.0);
    }
    rig.press(Button::Start);
    rig.weigh(200.0);
    assert_eq!(rig.ctl.current_weight_g(), 0.0);
    assert_eq!(rig.step(100), ActuatorCommand::Forward(0.8));
    assert_eq!(rig.state(), MachineState::Running);
}

#[test]
fn glitch_before_start_does_not_skew_the_zero() {
    let mut rig = Rig::new(ControllerCfg::default());
    for _ in 0..8 {
        rig.weigh(0.0);
    }
    rig.ctl.on_sample(8_000_000);
    rig.press(Button::Start);
    for _ in 0..5 {
        rig.weigh(3.0);
        rig.step(100);
    }
    assert!((rig.ctl.current_weight_g() - 3.0).abs() < 1e-4);
    assert_eq!(rig.state(), MachineState::Running);
}

#[test]
fn calibration_hold_aborts_without_change() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.ctl.handle_command(RemoteCommand::Calibrate).unwrap();
    rig.press(Button::Start);
    for _ in 0..5 {
        rig.ctl.on_sample(5000);
    }
    rig.hold(Button::Start);
    assert_eq!(rig.state(), MachineState::Idle);
    for _ in 0..10 {
        rig.ctl.on_sample(5000);
    }
    assert_eq!(rig.state(), MachineState::Idle);
    assert_eq!(rig.ctl.scale_factor(), CPG);
}

#[test]
fn persistent_sensor_faults_stop_the_run() {
    let cfg = ControllerCfg::default();
    let limit = cfg.scale.sensor_fault_limit;
    let mut rig = Rig::new(cfg);
    rig.press(Button::Start);
    rig.step(100);
    for _ in 0..limit - 1 {
        rig.ctl.on_sensor_fault();
    }
    assert_eq!(rig.state(), MachineState::Running);
    rig.ctl.on_sensor_fault();
    assert_eq!(rig.state(), MachineState::Empty);
}

#[test]
fn implausible_reading_holds_last_weight() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    rig.weigh(4.0);
    rig.ctl.on_sample(i32::MAX);
    assert!((rig.ctl.current_weight_g() - 4.0).abs() < 1e-4);
    assert_eq!(rig.state(), MachineState::Running);
}

#[test]
fn update_parks_machine_until_aborted() {
    let mut rig = Rig::new(ControllerCfg::default());
    rig.press(Button::Start);
    assert!(matches!(rig.step(100), ActuatorCommand::Forward(_)));
    rig.ctl.handle_command(RemoteCommand::BeginUpdate).unwrap();
    assert_eq!(rig.state(), MachineState::Updating);
    assert_eq!(rig.step(100), ActuatorCommand::Stop);

    rig.press(Button::Start);
    assert_eq!(rig.state(), MachineState::Updating);
    assert!(rig.ctl.handle_command(RemoteCommand::Start).is_err());

    rig.ctl.handle_command(RemoteCommand::AbortUpdate).unwrap();
    assert_eq!(rig.state(), MachineState::Idle);
}

#[test]
fn boot_restores_selection_and_counters() {
    let state = PersistedState {
        selected: 1,
        large_runs: 7,
        total_weight_g: 123.5,
        block_threshold_g: 0.1,
        scale_factor: CPG,
        ..PersistedState::default()
    };
    let rig = Rig::with_state(ControllerCfg::default(), state);
    let snap = rig.ctl.snapshot();
    assert_eq!(snap.selected_preset, PresetId::Large);
    assert_eq!(snap.remaining_dg, 120);
    assert_eq!(snap.large_runs, 7);
    assert!((snap.stall_threshold_g - 0.1).abs() < 1e-6);
}

#[test]
fn corrupt_stored_values_are_sanitized() {
    let state = PersistedState {
        small_dg: 0,
        large_dg: 900,
        selected: 9,
        block_threshold_g: f32::NAN,
        scale_factor: 0.0,
        ..PersistedState::default()
    };
    let rig = Rig::with_state(ControllerCfg::default(), state);
    assert_eq!(rig.ctl.preset_dg(PresetId::Small), 1);
    assert_eq!(rig.ctl.preset_dg(PresetId::Large), 300);
    assert_eq!(rig.ctl.selected(), PresetId::Small);
    assert!((rig.ctl.stall_threshold_g() - 0.03).abs() < 1e-6);
    assert_eq!(rig.ctl.scale_factor(), 1.0);
}

#[test]
fn unavailable_store_falls_back_to_defaults_and_keeps_running() {
    let store = MemoryStore::new();
    store.set_failing(true);
    let clock = ManualClock::new();
    let mut ctl =
        GrindController::new(ControllerCfg::default(), store.clone(), Arc::new(clock.clone()))
            .unwrap();
    assert_eq!(ctl.preset_dg(PresetId::Small), 80);
    assert_eq!(ctl.preset_dg(PresetId::Large), 120);

    ctl.on_sample(0);
    ctl.handle_input(ButtonEvent::press(Button::Left));
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(store.saves(), 0);
}

#[test]
fn save_of_load_is_a_fixed_point() {
    let state = PersistedState {
        small_dg: 77,
        selected: 1,
        scale_factor: 421.5,
        small_runs: 3,
        total_weight_g: 54.3,
        ..PersistedState::default()
    };
    let mut store = MemoryStore::with_state(state.clone());
    let loaded = store.load().unwrap();
    store.save(&loaded).unwrap();
    assert_eq!(store.stored().unwrap(), state);
}
