use std::sync::Arc;

use grinder_core::mocks::RecordingBackend;
use grinder_core::state::{MAX_PRESET_DG, MIN_PRESET_DG, clamp_preset_dg};
use grinder_core::{
    ActuatorCommand, Button, ControllerCfg, GrindController, InputCfg, InputClassifier,
    MachineState, MemoryStore, MotorActuator, PresetId, PressKind, RampCfg, RemoteCommand,
};
use grinder_traits::ManualClock;
use proptest::prelude::*;

fn command() -> impl Strategy<Value = ActuatorCommand> {
    prop_oneof![
        Just(ActuatorCommand::Stop),
        (0.0f32..=1.0).prop_map(ActuatorCommand::Forward),
        (0.0f32..=1.0).prop_map(ActuatorCommand::Reverse),
    ]
}

proptest! {
    #[test]
    fn preset_clamp_law(dg in any::<i64>()) {
        let c = clamp_preset_dg(dg);
        prop_assert!((MIN_PRESET_DG..=MAX_PRESET_DG).contains(&c));
        if (i64::from(MIN_PRESET_DG)..=i64::from(MAX_PRESET_DG)).contains(&dg) {
            prop_assert_eq!(i64::from(c), dg);
        }
    }

    #[test]
    fn remote_preset_target_always_lands_in_range(dg in any::<i64>()) {
        let mut ctl = GrindController::new(
            ControllerCfg::default(),
            MemoryStore::new(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        ctl.handle_command(RemoteCommand::SetPresetTarget(PresetId::Small, dg)).unwrap();
        let v = ctl.preset_dg(PresetId::Small);
        prop_assert!((MIN_PRESET_DG..=MAX_PRESET_DG).contains(&v));
        prop_assert_eq!(ctl.state(), MachineState::Idle);
    }

    #[test]
    fn actuator_output_stays_within_bounds(
        cmds in prop::collection::vec((command(), 1usize..400), 1..12)
    ) {
        let cfg = RampCfg::default();
        let mut act = MotorActuator::new(RecordingBackend::default(), &cfg);
        for (cmd, ticks) in cmds {
            act.set_target(cmd);
            for _ in 0..ticks {
                act.tick().unwrap();
                let out = act.current_output().abs();
                prop_assert!(
                    out == 0.0 || (out >= cfg.min_output && out <= cfg.max_output),
                    "output {} outside bounds", out
                );
            }
        }
    }

    #[test]
    fn actuator_never_flips_sign_without_passing_minimum(
        cmds in prop::collection::vec((command(), 1usize..400), 1..12)
    ) {
        let cfg = RampCfg::default();
        let mut act = MotorActuator::new(RecordingBackend::default(), &cfg);
        let mut prev = 0.0f32;
        for (cmd, ticks) in cmds {
            act.set_target(cmd);
            for _ in 0..ticks {
                act.tick().unwrap();
                let out = act.current_output();
                if prev != 0.0 && out != 0.0 && prev.signum() != out.signum() {
                    prop_assert!(prev.abs() <= cfg.min_output + 1e-6);
                    prop_assert!(out.abs() <= cfg.min_output + 1e-6);
                }
                prev = out;
            }
        }
    }

    #[test]
    fn classifier_emits_at_most_one_event_per_stable_press(
        segments in prop::collection::vec((any::<bool>(), 1u64..4000), 1..20)
    ) {
        let cfg = InputCfg::default();
        let mut input = InputClassifier::new(&cfg);
        let mut t = 0u64;
        let mut events = Vec::new();
        let mut prev_level = false;
        let mut rising_edges = 0;
        for (level, dur) in segments {
            if level && !prev_level {
                rising_edges += 1;
            }
            prev_level = level;
            let end = t + dur;
            while t < end {
                if let Some(ev) = input.sample(Button::Start, level, t) {
                    events.push(ev);
                }
                t += 10;
            }
        }
        prop_assert!(events.len() <= rising_edges);
        prop_assert!(events.iter().all(|e| e.button == Button::Start));
        let holds = events.iter().filter(|e| e.kind == PressKind::Hold).count();
        prop_assert!(holds <= rising_edges);
    }
}
