#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the grinder controller.
//!
//! Every section is optional and falls back to compiled-in defaults, so an
//! empty file is a valid configuration. `Config::validate` enforces ranges
//! that serde cannot express.
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// BCM pin numbers. Only consulted by the GPIO backends.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    pub motor_step: u8,
    pub motor_dir: u8,
    pub motor_en: Option<u8>,
    pub esc_pwm: Option<u8>,
    pub btn_left: u8,
    pub btn_right: u8,
    pub btn_start: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            hx711_dt: 5,
            hx711_sck: 6,
            motor_step: 23,
            motor_dir: 24,
            motor_en: Some(25),
            esc_pwm: Some(18),
            btn_left: 17,
            btn_right: 27,
            btn_start: 22,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScaleCfg {
    pub sample_rate_hz: u32,
    /// Max time to wait for one conversion before counting a sensor fault.
    pub read_timeout_ms: u64,
    /// Raw samples averaged for tare and calibration.
    pub calibration_samples: usize,
    /// Reference mass placed on the platform during calibration.
    pub known_weight_g: f32,
    /// Readings beyond this magnitude are treated as sensor faults.
    pub max_plausible_g: f32,
    /// Consecutive faults before the controller treats the run as stalled.
    pub sensor_fault_limit: u32,
}

impl Default for ScaleCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 5,
            read_timeout_ms: 150,
            calibration_samples: 10,
            known_weight_g: 10.92,
            max_plausible_g: 2000.0,
            sensor_fault_limit: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    pub loop_hz: u32,
    /// Forward fraction used while grinding normally.
    pub run_fraction: f32,
    /// Remaining grams at or below which the reduced fraction applies.
    pub slowdown_threshold_g: f32,
    /// Multiplier applied to `run_fraction` near the target.
    pub slowdown_fraction: f32,
    pub settle_ms: u64,
    pub saving_dwell_ms: u64,
    /// Ignore the first start-button release after a remote start.
    pub suppress_release_after_remote_start: bool,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            loop_hz: 10,
            run_fraction: 0.8,
            slowdown_threshold_g: 1.0,
            slowdown_fraction: 0.5,
            settle_ms: 500,
            saving_dwell_ms: 2000,
            suppress_release_after_remote_start: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    #[default]
    ReverseRetry,
    FailFast,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StallCfg {
    pub policy: StallPolicy,
    /// Minimum weight change (g) that counts as progress.
    pub block_threshold_g: f32,
    pub timeout_ms: u64,
    pub reverse_ms: u64,
    pub max_reverse_attempts: u32,
    pub reverse_fraction: f32,
    /// Upper bound accepted for remote threshold updates.
    pub max_block_threshold_g: f32,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            policy: StallPolicy::ReverseRetry,
            block_threshold_g: 0.03,
            timeout_ms: 2000,
            reverse_ms: 500,
            max_reverse_attempts: 3,
            reverse_fraction: 0.5,
            max_block_threshold_g: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    #[default]
    Stepper,
    Esc,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorCfg {
    pub kind: ActuatorKind,
    pub tick_hz: u32,
    pub min_output: f32,
    pub max_output: f32,
    pub ramp_up_per_tick: f32,
    pub ramp_down_per_tick: f32,
    /// Hold at `min_output` for this long when starting from standstill.
    pub kick_dwell_ms: u64,
}

impl Default for ActuatorCfg {
    fn default() -> Self {
        Self {
            kind: ActuatorKind::Stepper,
            tick_hz: 1000,
            min_output: 0.05,
            max_output: 1.0,
            ramp_up_per_tick: 0.001,
            ramp_down_per_tick: 0.01,
            kick_dwell_ms: 150,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StepperCfg {
    pub max_steps_per_sec: u32,
}

impl Default for StepperCfg {
    fn default() -> Self {
        Self {
            max_steps_per_sec: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EscCfg {
    pub neutral_us: u16,
    pub forward_max_us: u16,
    pub reverse_max_us: u16,
    /// Smallest forward pulse that actually turns the motor.
    pub min_forward_us: u16,
}

impl Default for EscCfg {
    fn default() -> Self {
        Self {
            neutral_us: 1500,
            forward_max_us: 2000,
            reverse_max_us: 1000,
            min_forward_us: 1550,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputCfg {
    pub debounce_ms: u64,
    pub longpress_ms: u64,
    pub poll_hz: u32,
    /// Treat a high level as pressed when true
    pub active_high: bool,
}

impl Default for InputCfg {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            longpress_ms: 2000,
            poll_hz: 100,
            active_high: true,
        }
    }
}

/// Compiled-in preset targets used when nothing is persisted yet.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PresetsCfg {
    pub small_dg: u16,
    pub large_dg: u16,
}

impl Default for PresetsCfg {
    fn default() -> Self {
        Self {
            small_dg: 80,
            large_dg: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreCfg {
    pub path: PathBuf,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("grinder-state.toml"),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    pub scale: ScaleCfg,
    pub control: ControlCfg,
    pub stall: StallCfg,
    pub actuator: ActuatorCfg,
    pub stepper: StepperCfg,
    pub esc: EscCfg,
    pub input: InputCfg,
    pub presets: PresetsCfg,
    pub store: StoreCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {e}", path.display()))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn in_unit(x: f32) -> bool {
    x.is_finite() && x > 0.0 && x <= 1.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Scale
        if self.scale.sample_rate_hz == 0 {
            eyre::bail!("scale.sample_rate_hz must be > 0");
        }
        if self.scale.read_timeout_ms == 0 {
            eyre::bail!("scale.read_timeout_ms must be >= 1");
        }
        if self.scale.calibration_samples == 0 {
            eyre::bail!("scale.calibration_samples must be >= 1");
        }
        if !(self.scale.known_weight_g.is_finite() && self.scale.known_weight_g > 0.0) {
            eyre::bail!("scale.known_weight_g must be > 0");
        }
        if !(self.scale.max_plausible_g.is_finite() && self.scale.max_plausible_g > 0.0) {
            eyre::bail!("scale.max_plausible_g must be > 0");
        }
        if self.scale.sensor_fault_limit == 0 {
            eyre::bail!("scale.sensor_fault_limit must be >= 1");
        }

        // Control
        if self.control.loop_hz == 0 {
            eyre::bail!("control.loop_hz must be > 0");
        }
        if !in_unit(self.control.run_fraction) {
            eyre::bail!("control.run_fraction must be in (0.0, 1.0]");
        }
        if !in_unit(self.control.slowdown_fraction) {
            eyre::bail!("control.slowdown_fraction must be in (0.0, 1.0]");
        }
        if !self.control.slowdown_threshold_g.is_finite()
            || self.control.slowdown_threshold_g.is_sign_negative()
        {
            eyre::bail!("control.slowdown_threshold_g must be >= 0");
        }
        if self.control.settle_ms > 60 * 1000 {
            eyre::bail!("control.settle_ms is unreasonably large (>60s)");
        }
        if self.control.saving_dwell_ms > 60 * 1000 {
            eyre::bail!("control.saving_dwell_ms is unreasonably large (>60s)");
        }

        // Stall
        let s = &self.stall;
        if !(s.max_block_threshold_g.is_finite() && s.max_block_threshold_g > 0.0) {
            eyre::bail!("stall.max_block_threshold_g must be > 0");
        }
        if !s.block_threshold_g.is_finite()
            || s.block_threshold_g.is_sign_negative()
            || s.block_threshold_g > s.max_block_threshold_g
        {
            eyre::bail!("stall.block_threshold_g must be in [0.0, stall.max_block_threshold_g]");
        }
        if s.timeout_ms == 0 {
            eyre::bail!("stall.timeout_ms must be >= 1");
        }
        if s.policy == StallPolicy::ReverseRetry {
            if s.reverse_ms == 0 {
                eyre::bail!("stall.reverse_ms must be >= 1 with the reverse_retry policy");
            }
            if !in_unit(s.reverse_fraction) {
                eyre::bail!("stall.reverse_fraction must be in (0.0, 1.0]");
            }
        }

        // Actuator
        let a = &self.actuator;
        if a.tick_hz == 0 {
            eyre::bail!("actuator.tick_hz must be > 0");
        }
        if !in_unit(a.max_output) {
            eyre::bail!("actuator.max_output must be in (0.0, 1.0]");
        }
        if !(a.min_output.is_finite() && a.min_output > 0.0 && a.min_output <= a.max_output) {
            eyre::bail!("actuator.min_output must be in (0.0, actuator.max_output]");
        }
        if !in_unit(a.ramp_up_per_tick) {
            eyre::bail!("actuator.ramp_up_per_tick must be in (0.0, 1.0]");
        }
        if !in_unit(a.ramp_down_per_tick) {
            eyre::bail!("actuator.ramp_down_per_tick must be in (0.0, 1.0]");
        }

        // Drivers
        if self.stepper.max_steps_per_sec == 0 {
            eyre::bail!("stepper.max_steps_per_sec must be > 0");
        }
        let e = &self.esc;
        if !(e.reverse_max_us < e.neutral_us && e.neutral_us < e.forward_max_us) {
            eyre::bail!("esc pulses must satisfy reverse_max_us < neutral_us < forward_max_us");
        }
        if !(e.neutral_us < e.min_forward_us && e.min_forward_us <= e.forward_max_us) {
            eyre::bail!("esc.min_forward_us must be in (neutral_us, forward_max_us]");
        }

        // Input
        if self.input.poll_hz == 0 {
            eyre::bail!("input.poll_hz must be > 0");
        }
        if self.input.longpress_ms <= self.input.debounce_ms {
            eyre::bail!("input.longpress_ms must be greater than input.debounce_ms");
        }

        // Presets
        for (name, dg) in [
            ("presets.small_dg", self.presets.small_dg),
            ("presets.large_dg", self.presets.large_dg),
        ] {
            if !(1..=300).contains(&dg) {
                eyre::bail!("{name} must be in [1, 300]");
            }
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
