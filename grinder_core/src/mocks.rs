//! Test doubles for the hardware traits and the actuator backend.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grinder_traits::{BoxError, Direction, Esc, Motor, Scale};

use crate::actuator::OutputBackend;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scale that replays queued readings, then repeats the last one.
#[derive(Clone, Default)]
pub struct ScriptedScale {
    queue: Arc<Mutex<VecDeque<Result<i32, String>>>>,
    last: Arc<Mutex<Option<i32>>>,
}

impl ScriptedScale {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, raw: i32) {
        lock(&self.queue).push_back(Ok(raw));
    }

    pub fn push_error(&self, msg: &str) {
        lock(&self.queue).push_back(Err(msg.to_string()));
    }
}

impl Scale for ScriptedScale {
    fn read(&mut self, _timeout: Duration) -> Result<i32, BoxError> {
        let next = lock(&self.queue).pop_front();
        match next {
            Some(Ok(v)) => {
                *lock(&self.last) = Some(v);
                Ok(v)
            }
            Some(Err(msg)) => Err(msg.into()),
            None => lock(&self.last).ok_or_else(|| "no reading".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendCall {
    Drive(Direction, f32),
    Stop,
}

/// Actuator backend that records every call; clones share the log.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failing: Arc<Mutex<u32>>,
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    /// Fail the next `n` stop calls after recording them.
    pub fn fail_stops(&self, n: u32) {
        *lock(&self.failing) = n;
    }
}

impl OutputBackend for RecordingBackend {
    fn drive(&mut self, direction: Direction, fraction: f32) -> Result<(), BoxError> {
        lock(&self.calls).push(BackendCall::Drive(direction, fraction));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BoxError> {
        lock(&self.calls).push(BackendCall::Stop);
        let mut left = lock(&self.failing);
        if *left > 0 {
            *left -= 1;
            return Err("stop write failed".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCall {
    Speed(u32),
    Direction(Direction),
    Start,
    Stop,
}

#[derive(Clone, Default)]
pub struct RecordingMotor {
    calls: Arc<Mutex<Vec<MotorCall>>>,
}

impl RecordingMotor {
    pub fn calls(&self) -> Vec<MotorCall> {
        lock(&self.calls).clone()
    }
}

impl Motor for RecordingMotor {
    fn set_speed(&mut self, steps_per_sec: u32) -> Result<(), BoxError> {
        lock(&self.calls).push(MotorCall::Speed(steps_per_sec));
        Ok(())
    }
    fn set_direction(&mut self, direction: Direction) -> Result<(), BoxError> {
        lock(&self.calls).push(MotorCall::Direction(direction));
        Ok(())
    }
    fn start(&mut self) -> Result<(), BoxError> {
        lock(&self.calls).push(MotorCall::Start);
        Ok(())
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        lock(&self.calls).push(MotorCall::Stop);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscCall {
    Pulse(u16),
    Stop,
}

#[derive(Clone, Default)]
pub struct RecordingEsc {
    calls: Arc<Mutex<Vec<EscCall>>>,
}

impl RecordingEsc {
    pub fn calls(&self) -> Vec<EscCall> {
        lock(&self.calls).clone()
    }
}

impl Esc for RecordingEsc {
    fn set_pulse_us(&mut self, pulse_us: u16) -> Result<(), BoxError> {
        lock(&self.calls).push(EscCall::Pulse(pulse_us));
        Ok(())
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        lock(&self.calls).push(EscCall::Stop);
        Ok(())
    }
}
