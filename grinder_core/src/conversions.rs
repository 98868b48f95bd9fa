//! `From` implementations bridging `grinder_config` types to `grinder_core` types.

use crate::config::{
    ControlCfg, ControllerCfg, EscCfg, GrinderCfg, InputCfg, PresetDefaults, RampCfg, ScaleCfg,
    StallCfg, StallPolicy, StepperCfg,
};

impl From<&grinder_config::ControlCfg> for ControlCfg {
    fn from(c: &grinder_config::ControlCfg) -> Self {
        Self {
            loop_hz: c.loop_hz,
            run_fraction: c.run_fraction,
            slowdown_threshold_g: c.slowdown_threshold_g,
            slowdown_fraction: c.slowdown_fraction,
            settle_ms: c.settle_ms,
            saving_dwell_ms: c.saving_dwell_ms,
            suppress_release_after_remote_start: c.suppress_release_after_remote_start,
        }
    }
}

impl From<grinder_config::StallPolicy> for StallPolicy {
    fn from(p: grinder_config::StallPolicy) -> Self {
        match p {
            grinder_config::StallPolicy::ReverseRetry => Self::ReverseRetry,
            grinder_config::StallPolicy::FailFast => Self::FailFast,
        }
    }
}

impl From<&grinder_config::StallCfg> for StallCfg {
    fn from(c: &grinder_config::StallCfg) -> Self {
        Self {
            policy: c.policy.into(),
            block_threshold_g: c.block_threshold_g,
            max_block_threshold_g: c.max_block_threshold_g,
            timeout_ms: c.timeout_ms,
            reverse_ms: c.reverse_ms,
            max_reverse_attempts: c.max_reverse_attempts,
            reverse_fraction: c.reverse_fraction,
        }
    }
}

impl From<&grinder_config::ScaleCfg> for ScaleCfg {
    fn from(c: &grinder_config::ScaleCfg) -> Self {
        Self {
            sample_rate_hz: c.sample_rate_hz,
            read_timeout_ms: c.read_timeout_ms,
            calibration_samples: c.calibration_samples,
            known_weight_g: c.known_weight_g,
            max_plausible_g: c.max_plausible_g,
            sensor_fault_limit: c.sensor_fault_limit,
        }
    }
}

impl From<&grinder_config::ActuatorCfg> for RampCfg {
    fn from(c: &grinder_config::ActuatorCfg) -> Self {
        Self {
            tick_hz: c.tick_hz,
            min_output: c.min_output,
            max_output: c.max_output,
            ramp_up_per_tick: c.ramp_up_per_tick,
            ramp_down_per_tick: c.ramp_down_per_tick,
            kick_dwell_ms: c.kick_dwell_ms,
        }
    }
}

impl From<&grinder_config::StepperCfg> for StepperCfg {
    fn from(c: &grinder_config::StepperCfg) -> Self {
        Self {
            max_steps_per_sec: c.max_steps_per_sec,
        }
    }
}

impl From<&grinder_config::EscCfg> for EscCfg {
    fn from(c: &grinder_config::EscCfg) -> Self {
        Self {
            neutral_us: c.neutral_us,
            forward_max_us: c.forward_max_us,
            reverse_max_us: c.reverse_max_us,
            min_forward_us: c.min_forward_us,
        }
    }
}

impl From<&grinder_config::InputCfg> for InputCfg {
    fn from(c: &grinder_config::InputCfg) -> Self {
        Self {
            debounce_ms: c.debounce_ms,
            longpress_ms: c.longpress_ms,
            poll_hz: c.poll_hz,
        }
    }
}

impl From<&grinder_config::PresetsCfg> for PresetDefaults {
    fn from(c: &grinder_config::PresetsCfg) -> Self {
        Self {
            small_dg: c.small_dg,
            large_dg: c.large_dg,
        }
    }
}

impl From<&grinder_config::Config> for GrinderCfg {
    fn from(c: &grinder_config::Config) -> Self {
        Self {
            controller: ControllerCfg {
                control: (&c.control).into(),
                stall: (&c.stall).into(),
                scale: (&c.scale).into(),
                presets: (&c.presets).into(),
            },
            ramp: (&c.actuator).into(),
            stepper: (&c.stepper).into(),
            esc: (&c.esc).into(),
            input: (&c.input).into(),
        }
    }
}
