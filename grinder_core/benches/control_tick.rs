use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use grinder_core::mocks::RecordingBackend;
use grinder_core::{
    ActuatorCommand, Button, ButtonEvent, ControllerCfg, GrindController, MemoryStore,
    MotorActuator, PersistedState, RampCfg,
};
use grinder_traits::ManualClock;

fn tune(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p grinder_core --bench control_tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }
}

fn running_controller(clock: &ManualClock) -> GrindController<MemoryStore> {
    let store = MemoryStore::with_state(PersistedState {
        scale_factor: 100.0,
        large_dg: 300,
        selected: 1,
        ..PersistedState::default()
    });
    let mut ctl = GrindController::new(ControllerCfg::default(), store, Arc::new(clock.clone()))
        .expect("controller");
    ctl.on_sample(0);
    ctl.handle_input(ButtonEvent::press(Button::Start));
    ctl
}

pub fn bench_controller(c: &mut Criterion) {
    let mut g = c.benchmark_group("controller");
    tune(&mut g);

    // One second of grinding at 10 Hz with a 5 Hz scale.
    g.bench_function("grind_second", |b| {
        b.iter_batched(
            || {
                let clock = ManualClock::new();
                let ctl = running_controller(&clock);
                (clock, ctl)
            },
            |(clock, mut ctl)| {
                for i in 0..10 {
                    if i % 2 == 0 {
                        ctl.on_sample(black_box(i * 40));
                    }
                    clock.advance_ms(100);
                    black_box(ctl.tick());
                }
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

pub fn bench_actuator(c: &mut Criterion) {
    let mut g = c.benchmark_group("actuator");
    tune(&mut g);

    let cfg = RampCfg::default();
    g.bench_function("ramp_up_and_reverse_1000_ticks", |b| {
        b.iter_batched(
            || MotorActuator::new(RecordingBackend::default(), &cfg),
            |mut act| {
                act.set_target(ActuatorCommand::Forward(0.8));
                for _ in 0..800 {
                    let _ = black_box(act.tick());
                }
                act.set_target(ActuatorCommand::Reverse(0.5));
                for _ in 0..200 {
                    let _ = black_box(act.tick());
                }
                black_box(act.current_output());
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(control_tick, bench_controller, bench_actuator);
criterion_main!(control_tick);
