//! Hardware backends for the grinder controller.
//!
//! The `sim` module is always available and is what the CLI uses on a
//! desktop. Real GPIO backends (HX711, step/dir stepper, PWM ESC, buttons)
//! are compiled only with the `hardware` feature.
pub mod error;
pub mod sim;
pub mod util;

#[cfg(feature = "hardware")]
pub mod hardware;
#[cfg(feature = "hardware")]
pub mod hx711;

pub use error::HwError;
pub use sim::{SimButton, SimParams, SimulatedButtons, SimulatedEsc, SimulatedGrinder, SimulatedMotor, SimulatedScale};

#[cfg(feature = "hardware")]
pub use hardware::{GpioButtons, HardwareScale, PwmEsc, StepDirMotor};
