//! Simulated grinder: a scale whose mass grows while the motor turns.
//!
//! `SimulatedGrinder` owns the shared physical model; the scale, stepper, ESC
//! and button handles it hands out all observe the same state, so the full
//! controller stack can run on a desktop. Time comes from a `Clock`, which
//! makes the model deterministic under `ManualClock`.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use grinder_traits::{
    BoxError, ButtonLevels, ButtonPanel, Clock, Direction, Esc, Motor, MonotonicClock, Scale,
};

use crate::error::HwError;
use crate::util::pulse_to_fraction;

#[derive(Debug)]
struct Model {
    mass_g: f32,
    /// Signed drive fraction in [-1, 1]; negative means reversing.
    drive: f32,
    jammed: bool,
    fail_reads: bool,
    last_update: Instant,
}

/// Knobs for the simulated mechanics.
#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    /// Mass delivered per second at full forward output.
    pub grams_per_sec: f32,
    /// Raw counts per gram reported by the simulated amplifier.
    pub counts_per_gram: f32,
    /// Raw counts with an empty platform.
    pub zero_counts: i32,
    /// Step rate that corresponds to full output on the simulated stepper.
    pub max_steps_per_sec: u32,
    pub esc_neutral_us: u16,
    pub esc_forward_max_us: u16,
    pub esc_reverse_max_us: u16,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            grams_per_sec: 2.0,
            counts_per_gram: 420.0,
            zero_counts: 8_400,
            max_steps_per_sec: 10_000,
            esc_neutral_us: 1500,
            esc_forward_max_us: 2000,
            esc_reverse_max_us: 1000,
        }
    }
}

/// Shared physical model; clone to hand the same grinder to several owners.
#[derive(Clone)]
pub struct SimulatedGrinder {
    model: Arc<Mutex<Model>>,
    params: SimParams,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Default for SimulatedGrinder {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl SimulatedGrinder {
    pub fn new(params: SimParams) -> Self {
        Self::with_clock(params, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        Self {
            model: Arc::new(Mutex::new(Model {
                mass_g: 0.0,
                drive: 0.0,
                jammed: false,
                fail_reads: false,
                last_update: now,
            })),
            params,
            clock,
        }
    }

    pub fn params(&self) -> SimParams {
        self.params
    }

    pub fn scale(&self) -> SimulatedScale {
        SimulatedScale { grinder: self.clone() }
    }

    pub fn motor(&self) -> SimulatedMotor {
        SimulatedMotor {
            grinder: self.clone(),
            speed_sps: 0,
            direction: Direction::Forward,
            running: false,
        }
    }

    pub fn esc(&self) -> SimulatedEsc {
        SimulatedEsc { grinder: self.clone() }
    }

    /// Block the mechanism: the motor keeps turning but no mass is delivered.
    pub fn set_jammed(&self, jammed: bool) {
        let mut m = self.lock();
        self.integrate(&mut m);
        m.jammed = jammed;
    }

    /// Make every subsequent scale read time out.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Current simulated mass on the platform.
    pub fn mass_g(&self) -> f32 {
        let mut m = self.lock();
        self.integrate(&mut m);
        m.mass_g
    }

    /// Put an arbitrary mass on the platform (e.g. a calibration weight).
    pub fn set_mass_g(&self, grams: f32) {
        let mut m = self.lock();
        self.integrate(&mut m);
        m.mass_g = grams.max(0.0);
    }

    /// Signed drive fraction the motor is currently applying.
    pub fn drive(&self) -> f32 {
        self.lock().drive
    }

    fn set_drive(&self, drive: f32) {
        let mut m = self.lock();
        self.integrate(&mut m);
        m.drive = drive.clamp(-1.0, 1.0);
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        // A poisoned model only means another handle panicked mid-update; the
        // plain-old-data inside is still usable.
        match self.model.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn integrate(&self, m: &mut Model) {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(m.last_update);
        m.last_update = now;
        if m.jammed || m.drive <= 0.0 || dt.is_zero() {
            return;
        }
        m.mass_g += self.params.grams_per_sec * m.drive * dt.as_secs_f32();
    }
}

pub struct SimulatedScale {
    grinder: SimulatedGrinder,
}

impl Scale for SimulatedScale {
    fn read(&mut self, _timeout: Duration) -> Result<i32, BoxError> {
        let (mass, fail) = {
            let mut m = self.grinder.lock();
            self.grinder.integrate(&mut m);
            (m.mass_g, m.fail_reads)
        };
        if fail {
            return Err(Box::new(HwError::Timeout));
        }
        let p = self.grinder.params;
        let raw = p.zero_counts as f32 + mass * p.counts_per_gram;
        tracing::trace!(raw, mass_g = mass, "simulated scale read");
        Ok(raw.round() as i32)
    }
}

/// Simulated step/dir stepper driver.
pub struct SimulatedMotor {
    grinder: SimulatedGrinder,
    speed_sps: u32,
    direction: Direction,
    running: bool,
}

impl SimulatedMotor {
    fn apply(&self) {
        let frac = if self.running {
            let max = self.grinder.params.max_steps_per_sec.max(1) as f32;
            (self.speed_sps as f32 / max).min(1.0)
        } else {
            0.0
        };
        let signed = match self.direction {
            Direction::Forward => frac,
            Direction::Reverse => -frac,
        };
        self.grinder.set_drive(signed);
    }
}

impl Motor for SimulatedMotor {
    fn set_speed(&mut self, steps_per_sec: u32) -> Result<(), BoxError> {
        self.speed_sps = steps_per_sec;
        self.apply();
        Ok(())
    }
    fn set_direction(&mut self, direction: Direction) -> Result<(), BoxError> {
        self.direction = direction;
        self.apply();
        Ok(())
    }
    fn start(&mut self) -> Result<(), BoxError> {
        self.running = true;
        self.apply();
        tracing::debug!("simulated stepper enabled");
        Ok(())
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        self.running = false;
        self.apply();
        tracing::debug!("simulated stepper stopped");
        Ok(())
    }
}

/// Simulated bidirectional ESC.
pub struct SimulatedEsc {
    grinder: SimulatedGrinder,
}

impl Esc for SimulatedEsc {
    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), BoxError> {
        let p = self.grinder.params;
        let frac = pulse_to_fraction(
            pulse_us,
            p.esc_neutral_us,
            p.esc_forward_max_us,
            p.esc_reverse_max_us,
        );
        self.grinder.set_drive(frac);
        Ok(())
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        self.grinder.set_drive(0.0);
        tracing::debug!("simulated esc stopped");
        Ok(())
    }
}

/// Logical button on the simulated front panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimButton {
    Left,
    Right,
    Start,
}

/// Front panel whose levels are set programmatically. Clones share levels.
#[derive(Clone, Default)]
pub struct SimulatedButtons {
    levels: Arc<Mutex<ButtonLevels>>,
}

impl SimulatedButtons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, button: SimButton, pressed: bool) {
        let mut l = match self.levels.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match button {
            SimButton::Left => l.left = pressed,
            SimButton::Right => l.right = pressed,
            SimButton::Start => l.start = pressed,
        }
    }
}

impl ButtonPanel for SimulatedButtons {
    fn levels(&mut self) -> Result<ButtonLevels, BoxError> {
        self.levels
            .lock()
            .map(|g| *g)
            .map_err(|_| Box::new(HwError::Gpio("button state poisoned".into())) as BoxError)
    }
}
