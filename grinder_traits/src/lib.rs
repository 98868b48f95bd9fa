//! Hardware seams for the grinder controller.
//!
//! Everything the control engine touches on the physical side goes through
//! these traits: the load-cell amplifier, the two motor driver flavours and the
//! front-panel buttons. Implementations live in `grinder_hardware`.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Boxed error used at every trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Load-cell amplifier returning signed raw counts.
pub trait Scale {
    /// Block until a conversion is ready or `timeout` expires.
    fn read(&mut self, timeout: std::time::Duration) -> Result<i32, BoxError>;
}

/// Direction of travel for reversible drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Velocity-driven motor (stepper via step/dir driver).
pub trait Motor {
    fn set_speed(&mut self, steps_per_sec: u32) -> Result<(), BoxError>;
    fn set_direction(&mut self, direction: Direction) -> Result<(), BoxError>;
    /// Enable the driver stage and begin emitting steps at the last set speed.
    fn start(&mut self) -> Result<(), BoxError>;
    fn stop(&mut self) -> Result<(), BoxError>;
}

/// Throttle-driven motor (brushless motor behind an electronic speed controller).
pub trait Esc {
    /// Emit a servo pulse of `pulse_us` microseconds on every frame.
    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), BoxError>;
    /// Explicit stop command; distinct from commanding a zero-throttle pulse.
    fn stop(&mut self) -> Result<(), BoxError>;
}

/// Raw, undebounced levels of the three front-panel buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonLevels {
    pub left: bool,
    pub right: bool,
    pub start: bool,
}

/// Source of raw button levels, `true` meaning "pressed".
pub trait ButtonPanel {
    fn levels(&mut self) -> Result<ButtonLevels, BoxError>;
}

impl<T: Scale + ?Sized> Scale for Box<T> {
    fn read(&mut self, timeout: std::time::Duration) -> Result<i32, BoxError> {
        (**self).read(timeout)
    }
}

impl<T: Motor + ?Sized> Motor for Box<T> {
    fn set_speed(&mut self, steps_per_sec: u32) -> Result<(), BoxError> {
        (**self).set_speed(steps_per_sec)
    }
    fn set_direction(&mut self, direction: Direction) -> Result<(), BoxError> {
        (**self).set_direction(direction)
    }
    fn start(&mut self) -> Result<(), BoxError> {
        (**self).start()
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        (**self).stop()
    }
}

impl<T: Esc + ?Sized> Esc for Box<T> {
    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), BoxError> {
        (**self).set_pulse_us(pulse_us)
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        (**self).stop()
    }
}

impl<T: ButtonPanel + ?Sized> ButtonPanel for Box<T> {
    fn levels(&mut self) -> Result<ButtonLevels, BoxError> {
        (**self).levels()
    }
}
