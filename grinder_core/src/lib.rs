#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Grind-control engine (hardware-agnostic).
//!
//! All hardware goes through the `grinder_traits` seams. The pieces:
//!
//! - **Controller**: the machine state machine, weight-feedback stopping,
//!   slowdown and stall recovery (`controller`)
//! - **Scale**: raw counts to grams with tare and calibration (`scale`)
//! - **Input**: debounced press / long-press classification (`input`)
//! - **Actuator**: ramped output over stepper or ESC backends (`actuator`)
//! - **Store**: persisted presets, counters and calibration (`store`)
//! - **Telemetry**: single-writer snapshot for presentation (`telemetry`)
//! - **Runner**: the sampling, input, actuator and control tasks (`runner`)
//!
//! Presets are kept in **decigrams** (`u16`, 0.1 g) so persisted targets never
//! drift; live weights are `f32` grams.

pub mod actuator;
pub mod command;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod input;
pub mod mocks;
pub mod runner;
pub mod sampler;
pub mod scale;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;

pub use actuator::{ActuatorCommand, MotorActuator, OutputBackend, ThrottleBackend, VelocityBackend};
pub use command::RemoteCommand;
pub use config::{
    ControlCfg, ControllerCfg, EscCfg, GrinderCfg, InputCfg, PresetDefaults, RampCfg, ScaleCfg,
    StallCfg, StallPolicy, StepperCfg,
};
pub use controller::GrindController;
pub use error::{BuildError, GrinderError, Result};
pub use input::{Button, ButtonEvent, InputClassifier, PressKind};
pub use runner::{Machine, MachineBuilder, MachineHandle};
pub use scale::{ScaleSource, SensorFault};
pub use state::{MachineState, PresetId};
pub use store::{MemoryStore, PersistedState, PresetStore, TomlFileStore};
pub use telemetry::{Snapshot, TelemetryCell, TelemetryPublisher, TelemetryReader};
