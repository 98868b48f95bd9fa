//! Runtime configuration for the grind-control engine.
//!
//! These are separate from the TOML-deserialized config in `grinder_config`;
//! tests build them directly and adjust thresholds per case.

/// Control loop and stopping behaviour.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    pub loop_hz: u32,
    /// Forward fraction while grinding far from target.
    pub run_fraction: f32,
    /// Remaining mass (g) at or below which the reduced fraction applies.
    pub slowdown_threshold_g: f32,
    /// Multiplier on `run_fraction` near the target.
    pub slowdown_fraction: f32,
    /// Wait after apparent target before trusting the reading.
    pub settle_ms: u64,
    /// User-visible pause in `Saving` before returning to `Idle`.
    pub saving_dwell_ms: u64,
    /// Swallow the first start press after a remote start.
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

/// Recovery applied once the stall timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallPolicy {
    /// Reverse briefly, then resume forward; give up after the attempt cap.
    #[default]
    ReverseRetry,
    /// Go straight to `Empty`.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct StallCfg {
    pub policy: StallPolicy,
    /// Initial threshold; the persisted value overrides it at boot.
    pub block_threshold_g: f32,
    /// Upper bound for remotely set thresholds.
    pub max_block_threshold_g: f32,
    pub timeout_ms: u64,
    pub reverse_ms: u64,
    pub max_reverse_attempts: u32,
    pub reverse_fraction: f32,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            policy: StallPolicy::ReverseRetry,
            block_threshold_g: 0.03,
            max_block_threshold_g: 5.0,
            timeout_ms: 2000,
            reverse_ms: 500,
            max_reverse_attempts: 3,
            reverse_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaleCfg {
    pub sample_rate_hz: u32,
    pub read_timeout_ms: u64,
    /// Samples averaged for tare and calibration.
    pub calibration_samples: usize,
    pub known_weight_g: f32,
    pub max_plausible_g: f32,
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

/// Actuator ramp parameters, all in fractions of full output.
#[derive(Debug, Clone)]
pub struct RampCfg {
    pub tick_hz: u32,
    pub min_output: f32,
    pub max_output: f32,
    pub ramp_up_per_tick: f32,
    pub ramp_down_per_tick: f32,
    pub kick_dwell_ms: u64,
}

impl Default for RampCfg {
    fn default() -> Self {
        Self {
            tick_hz: 1000,
            min_output: 0.05,
            max_output: 1.0,
            ramp_up_per_tick: 0.001,
            ramp_down_per_tick: 0.01,
            kick_dwell_ms: 150,
        }
    }
}

#[derive(Debug, Clone)]
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

#[derive(Debug, Clone)]
pub struct EscCfg {
    pub neutral_us: u16,
    pub forward_max_us: u16,
    pub reverse_max_us: u16,
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

#[derive(Debug, Clone)]
pub struct InputCfg {
    pub debounce_ms: u64,
    pub longpress_ms: u64,
    pub poll_hz: u32,
}

impl Default for InputCfg {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            longpress_ms: 2000,
            poll_hz: 100,
        }
    }
}

/// Preset targets used when the store has nothing yet.
#[derive(Debug, Clone)]
pub struct PresetDefaults {
    pub small_dg: u16,
    pub large_dg: u16,
}

impl Default for PresetDefaults {
    fn default() -> Self {
        Self {
            small_dg: 80,
            large_dg: 120,
        }
    }
}

/// Everything the controller needs at construction.
#[derive(Debug, Clone, Default)]
pub struct ControllerCfg {
    pub control: ControlCfg,
    pub stall: StallCfg,
    pub scale: ScaleCfg,
    pub presets: PresetDefaults,
}

/// Full runtime configuration for a spawned machine.
#[derive(Debug, Clone, Default)]
pub struct GrinderCfg {
    pub controller: ControllerCfg,
    pub ramp: RampCfg,
    pub stepper: StepperCfg,
    pub esc: EscCfg,
    pub input: InputCfg,
}
