//! Ramped execution of normalized motor commands.
//!
//! The controller speaks in `ActuatorCommand`s (fractions of full output);
//! `MotorActuator` owns the physical output and walks it toward the command
//! by a bounded step per `tick()`. Two backends translate fractions into
//! physical units: step rate for a stepper, servo pulse width for an ESC.
use grinder_traits::{BoxError, Direction, Esc, Motor};

use crate::config::{EscCfg, RampCfg, StepperCfg};
use crate::error::Result;
use crate::hw_error::map_boxed;
use crate::util::ms_to_ticks;

/// Normalized command issued by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    /// Explicit stop; distinct from running at zero.
    Stop,
    Forward(f32),
    Reverse(f32),
}

impl ActuatorCommand {
    fn split(self) -> Option<(Direction, f32)> {
        match self {
            Self::Stop => None,
            Self::Forward(f) => Some((Direction::Forward, f)),
            Self::Reverse(f) => Some((Direction::Reverse, f)),
        }
    }
}

/// Physical side of an actuator.
pub trait OutputBackend {
    /// Drive at `fraction` of full output in `direction`, starting the drive if needed.
    fn drive(&mut self, direction: Direction, fraction: f32) -> std::result::Result<(), BoxError>;
    /// Explicit stop command.
    fn stop(&mut self) -> std::result::Result<(), BoxError>;
}

impl<T: OutputBackend + ?Sized> OutputBackend for Box<T> {
    fn drive(&mut self, direction: Direction, fraction: f32) -> std::result::Result<(), BoxError> {
        (**self).drive(direction, fraction)
    }
    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        (**self).stop()
    }
}

/// Velocity backend: fraction of `max_steps_per_sec` on a step/dir driver.
pub struct VelocityBackend<M: Motor> {
    motor: M,
    max_sps: u32,
    direction: Option<Direction>,
    running: bool,
}

impl<M: Motor> VelocityBackend<M> {
    pub fn new(motor: M, cfg: &StepperCfg) -> Self {
        Self {
            motor,
            max_sps: cfg.max_steps_per_sec.max(1),
            direction: None,
            running: false,
        }
    }

    fn steps_per_sec(&self, fraction: f32) -> u32 {
        let sps = (f64::from(fraction) * f64::from(self.max_sps)).round();
        (sps as u32).clamp(1, self.max_sps)
    }
}

impl<M: Motor> OutputBackend for VelocityBackend<M> {
    fn drive(&mut self, direction: Direction, fraction: f32) -> std::result::Result<(), BoxError> {
        if self.direction != Some(direction) {
            self.motor.set_direction(direction)?;
            self.direction = Some(direction);
        }
        self.motor.set_speed(self.steps_per_sec(fraction))?;
        if !self.running {
            self.motor.start()?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.running = false;
        self.motor.stop()
    }
}

/// Throttle backend: servo pulse around the ESC neutral point.
pub struct ThrottleBackend<E: Esc> {
    esc: E,
    cfg: EscCfg,
}

impl<E: Esc> ThrottleBackend<E> {
    pub fn new(esc: E, cfg: &EscCfg) -> Self {
        Self {
            esc,
            cfg: cfg.clone(),
        }
    }

    /// Pulse width for a signed drive. Forward never drops below `min_forward_us`.
    pub fn pulse_us(&self, direction: Direction, fraction: f32) -> u16 {
        let f = fraction.clamp(0.0, 1.0);
        let n = f32::from(self.cfg.neutral_us);
        let pulse = match direction {
            Direction::Forward => {
                let span = f32::from(self.cfg.forward_max_us) - n;
                (n + f * span).max(f32::from(self.cfg.min_forward_us))
            }
            Direction::Reverse => {
                let span = n - f32::from(self.cfg.reverse_max_us);
                n - f * span
            }
        };
        pulse.round() as u16
    }
}

impl<E: Esc> OutputBackend for ThrottleBackend<E> {
    fn drive(&mut self, direction: Direction, fraction: f32) -> std::result::Result<(), BoxError> {
        let pulse = self.pulse_us(direction, fraction);
        self.esc.set_pulse_us(pulse)
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.esc.stop()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Output {
    Stopped,
    Driving { direction: Direction, level: f32 },
}

pub struct MotorActuator<B: OutputBackend> {
    backend: B,
    cfg: RampCfg,
    kick_ticks: u64,
    target: ActuatorCommand,
    output: Output,
    /// Further ticks to hold minimum output; the entry tick counts as the first.
    kick_left: u64,
    last_applied: Option<Output>,
}

impl<B: OutputBackend> MotorActuator<B> {
    pub fn new(backend: B, cfg: &RampCfg) -> Self {
        Self {
            backend,
            kick_ticks: ms_to_ticks(cfg.kick_dwell_ms, cfg.tick_hz),
            cfg: cfg.clone(),
            target: ActuatorCommand::Stop,
            output: Output::Stopped,
            kick_left: 0,
            last_applied: Some(Output::Stopped),
        }
    }

    /// Set the command to ramp toward.
    ///
    /// A fraction outside `[0, 1]` is a caller bug: it asserts in debug builds
    /// and is clamped (and logged) otherwise.
    pub fn set_target(&mut self, cmd: ActuatorCommand) {
        let checked = |f: f32| -> f32 {
            let ok = f.is_finite() && (0.0..=1.0).contains(&f);
            debug_assert!(ok, "actuator fraction out of range: {f}");
            if ok {
                f
            } else {
                tracing::error!(fraction = f, "actuator fraction out of range, clamping");
                if f.is_finite() { f.clamp(0.0, 1.0) } else { 0.0 }
            }
        };
        self.target = match cmd {
            ActuatorCommand::Stop => ActuatorCommand::Stop,
            ActuatorCommand::Forward(f) => ActuatorCommand::Forward(checked(f)),
            ActuatorCommand::Reverse(f) => ActuatorCommand::Reverse(checked(f)),
        };
    }

    pub fn target(&self) -> ActuatorCommand {
        self.target
    }

    /// Signed physical output in fractions of full scale; 0 when stopped.
    pub fn current_output(&self) -> f32 {
        match self.output {
            Output::Stopped => 0.0,
            Output::Driving {
                direction: Direction::Forward,
                level,
            } => level,
            Output::Driving {
                direction: Direction::Reverse,
                level,
            } => -level,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.output == Output::Stopped
    }

    /// Advance the output one step toward the target and push it to the backend.
    pub fn tick(&mut self) -> Result<()> {
        self.output = self.next_output();
        if let Output::Driving { level, .. } = self.output {
            debug_assert!(
                level >= self.cfg.min_output && level <= self.cfg.max_output,
                "actuator output {level} outside configured bounds"
            );
        }
        self.apply()
    }

    /// Stop immediately, bypassing the ramp.
    pub fn halt(&mut self) -> Result<()> {
        self.target = ActuatorCommand::Stop;
        self.output = Output::Stopped;
        self.kick_left = 0;
        self.last_applied = None;
        self.apply()
    }

    fn bound(&self, f: f32) -> f32 {
        f.clamp(self.cfg.min_output, self.cfg.max_output)
    }

    fn next_output(&mut self) -> Output {
        let min = self.cfg.min_output;
        match (self.output, self.target.split()) {
            (Output::Stopped, None) => Output::Stopped,
            (Output::Driving { direction, level }, None) => {
                let next = level - self.cfg.ramp_down_per_tick;
                if next <= min {
                    Output::Stopped
                } else {
                    Output::Driving {
                        direction,
                        level: self.bound(next),
                    }
                }
            }
            (Output::Stopped, Some((direction, _))) => {
                self.kick_left = self.kick_ticks.saturating_sub(1);
                Output::Driving {
                    direction,
                    level: min,
                }
            }
            (Output::Driving { direction, level }, Some((want, _))) if direction != want => {
                if level <= min {
                    // Passing through standstill: kick again in the new direction.
                    self.kick_left = self.kick_ticks.saturating_sub(1);
                    Output::Driving {
                        direction: want,
                        level: min,
                    }
                } else {
                    Output::Driving {
                        direction,
                        level: self.bound(level - self.cfg.ramp_down_per_tick),
                    }
                }
            }
            (Output::Driving { direction, level }, Some((_, fraction))) => {
                if self.kick_left > 0 {
                    self.kick_left -= 1;
                    return Output::Driving { direction, level };
                }
                let goal = self.bound(fraction);
                let next = if goal > level {
                    (level + self.cfg.ramp_up_per_tick).min(goal)
                } else {
                    (level - self.cfg.ramp_down_per_tick).max(goal)
                };
                Output::Driving {
                    direction,
                    level: self.bound(next),
                }
            }
        }
    }

    fn apply(&mut self) -> Result<()> {
        if self.last_applied == Some(self.output) {
            return Ok(());
        }
        let res = match self.output {
            Output::Stopped => self.backend.stop(),
            Output::Driving { direction, level } => self.backend.drive(direction, level),
        };
        match res {
            Ok(()) => {
                self.last_applied = Some(self.output);
                Ok(())
            }
            // Leave `last_applied` stale so the next tick writes again.
            Err(e) => Err(eyre::Report::new(map_boxed(&e))),
        }
    }
}
