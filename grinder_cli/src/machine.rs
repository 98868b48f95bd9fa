//! Hardware assembly: the simulated grinder by default, GPIO backends with
//! `--features hardware`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grinder_config::{ActuatorKind, Config};
use grinder_core::{
    GrinderCfg, Machine, MachineBuilder, PersistedState, ThrottleBackend, TomlFileStore,
    VelocityBackend,
};
use grinder_traits::{MonotonicClock, Scale};

#[cfg(not(feature = "hardware"))]
use grinder_core::PresetStore;
#[cfg(not(feature = "hardware"))]
use grinder_hardware::{SimParams, SimulatedButtons, SimulatedGrinder};

/// Start the simulated grinder jammed (mass never grows).
#[cfg(not(feature = "hardware"))]
pub const ENV_SIM_JAM: &str = "GRINDER_SIM_JAM";
/// Make every simulated scale read time out.
#[cfg(not(feature = "hardware"))]
pub const ENV_SIM_FAIL_READS: &str = "GRINDER_SIM_FAIL_READS";
/// Simulated delivery rate at full output, grams per second.
#[cfg(not(feature = "hardware"))]
pub const ENV_SIM_RATE: &str = "GRINDER_SIM_RATE";

/// A running machine plus, in simulation, the model behind it.
pub struct Assembly {
    pub machine: Machine,
    #[cfg(not(feature = "hardware"))]
    pub sim: SimulatedGrinder,
}

impl Assembly {
    /// Put `grams` on the platform when simulating; `false` on real hardware.
    pub fn place_mass(&self, grams: f32) -> bool {
        #[cfg(not(feature = "hardware"))]
        {
            self.sim.set_mass_g(self.sim.mass_g() + grams);
            true
        }
        #[cfg(feature = "hardware")]
        {
            let _ = grams;
            false
        }
    }
}

pub fn state_path(cfg: &Config, override_path: Option<&Path>) -> PathBuf {
    override_path.map_or_else(|| cfg.store.path.clone(), Path::to_path_buf)
}

/// Store seeded with the configured preset defaults.
pub fn open_store(cfg: &Config, path: &Path, scale_factor: Option<f32>) -> TomlFileStore {
    let gcfg = GrinderCfg::from(cfg);
    let mut defaults = PersistedState::with_defaults(&gcfg.controller.presets, &gcfg.controller.stall);
    if let Some(f) = scale_factor {
        defaults.scale_factor = f;
    }
    TomlFileStore::new(path, defaults)
}

#[cfg(not(feature = "hardware"))]
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

#[cfg(not(feature = "hardware"))]
fn sim_params(cfg: &Config, state_file: &Path) -> SimParams {
    let mut p = SimParams {
        max_steps_per_sec: cfg.stepper.max_steps_per_sec,
        esc_neutral_us: cfg.esc.neutral_us,
        esc_forward_max_us: cfg.esc.forward_max_us,
        esc_reverse_max_us: cfg.esc.reverse_max_us,
        ..SimParams::default()
    };
    // A calibrated state file defines how the simulated load cell responds.
    if state_file.exists()
        && let Ok(st) = open_store(cfg, state_file, None).load()
        && st.scale_factor.is_finite()
        && st.scale_factor > 0.0
    {
        p.counts_per_gram = st.scale_factor;
    }
    if let Some(rate) = std::env::var(ENV_SIM_RATE)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|r| r.is_finite() && *r > 0.0)
    {
        p.grams_per_sec = rate;
    }
    p
}

#[cfg(not(feature = "hardware"))]
fn sim_grinder(cfg: &Config, state_file: &Path) -> SimulatedGrinder {
    let params = sim_params(cfg, state_file);
    let sim = SimulatedGrinder::new(params);
    if env_flag(ENV_SIM_JAM) {
        tracing::warn!("simulated grinder starts jammed");
        sim.set_jammed(true);
    }
    if env_flag(ENV_SIM_FAIL_READS) {
        tracing::warn!("simulated scale reads will time out");
        sim.set_fail_reads(true);
    }
    tracing::info!(
        grams_per_sec = params.grams_per_sec,
        counts_per_gram = params.counts_per_gram,
        "using simulated grinder"
    );
    sim
}

/// Assemble backends and spawn every task.
#[cfg(not(feature = "hardware"))]
pub fn spawn(cfg: &Config, state_file: &Path) -> eyre::Result<Assembly> {
    let sim = sim_grinder(cfg, state_file);
    let gcfg = GrinderCfg::from(cfg);
    let store = open_store(cfg, state_file, Some(sim.params().counts_per_gram));
    let builder = MachineBuilder::new(gcfg.clone())
        .scale(sim.scale())
        .buttons(SimulatedButtons::new())
        .store(store)
        .clock(Arc::new(MonotonicClock::new()));
    let builder = match cfg.actuator.kind {
        ActuatorKind::Stepper => builder.backend(VelocityBackend::new(sim.motor(), &gcfg.stepper)),
        ActuatorKind::Esc => builder.backend(ThrottleBackend::new(sim.esc(), &gcfg.esc)),
    };
    Ok(Assembly {
        machine: builder.spawn()?,
        sim,
    })
}

/// Assemble backends and spawn every task.
#[cfg(feature = "hardware")]
pub fn spawn(cfg: &Config, state_file: &Path) -> eyre::Result<Assembly> {
    use eyre::WrapErr;
    use grinder_hardware::{GpioButtons, PwmEsc, StepDirMotor};

    let gcfg = GrinderCfg::from(cfg);
    let p = &cfg.pins;
    let buttons = GpioButtons::new(p.btn_left, p.btn_right, p.btn_start, cfg.input.active_high)
        .wrap_err("open button pins")?;
    let builder = MachineBuilder::new(gcfg.clone())
        .scale(open_scale(cfg, state_file)?)
        .buttons(buttons)
        .store(open_store(cfg, state_file, None))
        .clock(Arc::new(MonotonicClock::new()));
    let builder = match cfg.actuator.kind {
        ActuatorKind::Stepper => {
            let en = p.motor_en.ok_or_else(|| {
                eyre::eyre!("invalid configuration: pins.motor_en missing for the stepper")
            })?;
            let motor = StepDirMotor::new(p.motor_step, p.motor_dir, en).wrap_err("open motor pins")?;
            builder.backend(VelocityBackend::new(motor, &gcfg.stepper))
        }
        ActuatorKind::Esc => {
            let pin = p.esc_pwm.ok_or_else(|| {
                eyre::eyre!("invalid configuration: pins.esc_pwm missing for the esc")
            })?;
            let esc = PwmEsc::new(pin).wrap_err("open motor pins")?;
            builder.backend(ThrottleBackend::new(esc, &gcfg.esc))
        }
    };
    Ok(Assembly {
        machine: builder.spawn()?,
    })
}

/// Scale on its own, for `self-check`.
#[cfg(not(feature = "hardware"))]
pub fn open_scale(cfg: &Config, state_file: &Path) -> eyre::Result<Box<dyn Scale + Send>> {
    Ok(Box::new(sim_grinder(cfg, state_file).scale()))
}

/// Scale on its own, for `self-check`.
#[cfg(feature = "hardware")]
pub fn open_scale(cfg: &Config, _state_file: &Path) -> eyre::Result<Box<dyn Scale + Send>> {
    use eyre::WrapErr;
    let scale = grinder_hardware::HardwareScale::new(cfg.pins.hx711_dt, cfg.pins.hx711_sck)
        .wrap_err("open hx711")?;
    Ok(Box::new(scale))
}
