//! The grind state machine.
//!
//! `GrindController` owns every piece of control state: the machine state, the
//! active grind session, presets, counters, calibration and the scale zero.
//! It is driven from a single task: samples, button events and remote commands
//! go in, and one `tick()` per control period yields the actuator command.
//! Time is read from the injected `Clock`; nothing in here sleeps.
use std::sync::Arc;
use std::time::Instant;

use grinder_traits::Clock;

use crate::actuator::ActuatorCommand;
use crate::command::RemoteCommand;
use crate::config::{ControllerCfg, StallPolicy};
use crate::error::{GrinderError, Result};
use crate::input::{Button, ButtonEvent, PressKind};
use crate::scale::ScaleSource;
use crate::state::{MachineState, PresetId, clamp_preset_dg};
use crate::store::{PersistedState, PresetStore};
use crate::telemetry::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Forward,
    Reversing { until_ms: u64 },
}

/// Per-grind bookkeeping; exists from `Running` until `Saving`/`Idle`.
#[derive(Debug, Clone)]
struct GrindSession {
    target_dg: u16,
    start_weight_g: f32,
    last_weight_g: f32,
    last_change_ms: u64,
    reverse_attempts: u32,
    phase: Phase,
}

impl GrindSession {
    fn new(target_dg: u16, weight_g: f32, now_ms: u64) -> Self {
        Self {
            target_dg,
            start_weight_g: weight_g,
            last_weight_g: weight_g,
            last_change_ms: now_ms,
            reverse_attempts: 0,
            phase: Phase::Forward,
        }
    }

    fn target_g(&self) -> f32 {
        f32::from(self.target_dg) / 10.0
    }

    /// Resume forward motion with a fresh stall window.
    fn rearm(&mut self, now_ms: u64) {
        self.last_change_ms = now_ms;
        self.reverse_attempts = 0;
        self.phase = Phase::Forward;
    }
}

#[derive(Debug, Clone, Copy)]
struct Presets {
    small_dg: u16,
    large_dg: u16,
}

impl Presets {
    fn get(self, id: PresetId) -> u16 {
        match id {
            PresetId::Small => self.small_dg,
            PresetId::Large => self.large_dg,
        }
    }

    fn set(&mut self, id: PresetId, dg: u16) {
        match id {
            PresetId::Small => self.small_dg = dg,
            PresetId::Large => self.large_dg = dg,
        }
    }
}

pub struct GrindController<P: PresetStore> {
    cfg: ControllerCfg,
    store: P,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    state: MachineState,
    presets: Presets,
    selected: PresetId,
    remaining_dg: u16,
    stall_threshold_g: f32,
    small_runs: u32,
    large_runs: u32,
    total_weight_g: f32,

    scale: ScaleSource,
    session: Option<GrindSession>,
    command: ActuatorCommand,
    measuring_since_ms: u64,
    saving_until_ms: u64,
    suppress_start_press: bool,
    sensor_faults: u32,
    /// Calibration is collecting a fresh window of reference-weight samples.
    calibration_capture: bool,
}

impl<P: PresetStore> GrindController<P> {
    /// Load persisted state (defaults on failure), sanitize it and start in `Idle`.
    pub fn new(cfg: ControllerCfg, store: P, clock: Arc<dyn Clock + Send + Sync>) -> Result<Self> {
        if !(cfg.control.run_fraction > 0.0 && cfg.control.run_fraction <= 1.0) {
            return Err(eyre::Report::new(crate::error::BuildError::InvalidConfig(
                "run_fraction must be in (0, 1]",
            )));
        }
        if !(cfg.stall.reverse_fraction >= 0.0 && cfg.stall.reverse_fraction <= 1.0) {
            return Err(eyre::Report::new(crate::error::BuildError::InvalidConfig(
                "reverse_fraction must be in [0, 1]",
            )));
        }

        let defaults = PersistedState::with_defaults(&cfg.presets, &cfg.stall);
        let stored = match store.load() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "persisted state unavailable, using defaults");
                defaults.clone()
            }
        };

        let presets = Presets {
            small_dg: clamp_preset_dg(i64::from(stored.small_dg)),
            large_dg: clamp_preset_dg(i64::from(stored.large_dg)),
        };
        let selected = PresetId::from_index(stored.selected);
        let stall_threshold_g = if valid_threshold(stored.block_threshold_g, &cfg) {
            stored.block_threshold_g
        } else {
            tracing::warn!(
                stored = stored.block_threshold_g,
                "stored stall threshold invalid, using default"
            );
            cfg.stall.block_threshold_g
        };
        let total_weight_g = if stored.total_weight_g.is_finite() {
            stored.total_weight_g
        } else {
            0.0
        };
        let scale = ScaleSource::new(&cfg.scale, stored.scale_factor);
        let epoch = clock.now();

        let ctl = Self {
            suppress_start_press: false,
            remaining_dg: presets.get(selected),
            state: MachineState::Idle,
            presets,
            selected,
            stall_threshold_g,
            small_runs: stored.small_runs,
            large_runs: stored.large_runs,
            total_weight_g,
            scale,
            session: None,
            command: ActuatorCommand::Stop,
            measuring_since_ms: 0,
            saving_until_ms: 0,
            sensor_faults: 0,
            calibration_capture: false,
            cfg,
            store,
            clock,
            epoch,
        };
        ctl.log_presets();
        Ok(ctl)
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn selected(&self) -> PresetId {
        self.selected
    }

    pub fn preset_dg(&self, id: PresetId) -> u16 {
        self.presets.get(id)
    }

    pub fn remaining_dg(&self) -> u16 {
        self.remaining_dg
    }

    pub fn current_weight_g(&self) -> f32 {
        self.scale.read_grams()
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale.scale_factor()
    }

    pub fn stall_threshold_g(&self) -> f32 {
        self.stall_threshold_g
    }

    pub fn reverse_attempts(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.reverse_attempts)
    }

    /// Command issued by the last `tick()`.
    pub fn actuator_command(&self) -> ActuatorCommand {
        self.command
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Telemetry view; `motor_output` is filled in by whoever owns the actuator.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            selected_preset: self.selected,
            remaining_dg: self.remaining_dg,
            current_weight_g: self.scale.read_grams(),
            scale_factor: self.scale.scale_factor(),
            stall_threshold_g: self.stall_threshold_g,
            small_runs: self.small_runs,
            large_runs: self.large_runs,
            total_weight_g: self.total_weight_g,
            small_dg: self.presets.small_dg,
            large_dg: self.presets.large_dg,
            motor_output: 0.0,
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    // ── Inputs ──────────────────────────────────────────────────────────────

    /// Feed one raw scale reading.
    pub fn on_sample(&mut self, raw: i32) {
        if self.state == MachineState::Updating {
            return;
        }
        match self.scale.ingest(raw) {
            Ok(grams) => {
                self.sensor_faults = 0;
                if self.calibration_capture && self.scale.window_full() {
                    self.calibration_capture = false;
                    self.finish_calibration();
                }
                if self.state == MachineState::Running {
                    let now = self.now_ms();
                    let threshold = self.stall_threshold_g;
                    if let Some(s) = self.session.as_mut()
                        && (grams - s.last_weight_g).abs() > threshold
                    {
                        s.last_weight_g = grams;
                        s.last_change_ms = now;
                        s.reverse_attempts = 0;
                    }
                }
            }
            Err(fault) => {
                tracing::warn!(%fault, raw, "scale reading rejected");
                self.on_sensor_fault();
            }
        }
    }

    /// Record a failed or implausible read. Persistent faults while grinding stop the run.
    pub fn on_sensor_fault(&mut self) {
        self.sensor_faults = self.sensor_faults.saturating_add(1);
        if self.sensor_faults < self.cfg.scale.sensor_fault_limit {
            tracing::warn!(consecutive = self.sensor_faults, "sensor fault");
            return;
        }
        if self.sensor_faults == self.cfg.scale.sensor_fault_limit {
            tracing::error!(consecutive = self.sensor_faults, "persistent sensor fault");
        }
        if self.state == MachineState::Running {
            self.enter(MachineState::Empty);
        }
    }

    /// Apply a classified button event.
    pub fn handle_input(&mut self, ev: ButtonEvent) {
        use MachineState as S;
        match (self.state, ev.button, ev.kind) {
            (S::Idle, Button::Start, PressKind::Press) => self.start_grind(),
            (S::Idle, Button::Left, PressKind::Press) => self.select_from_idle(PresetId::Small),
            (S::Idle, Button::Right, PressKind::Press) => self.select_from_idle(PresetId::Large),
            (S::Idle, Button::Left, PressKind::Hold) => self.enter(S::SetLeft),
            (S::Idle, Button::Right, PressKind::Hold) => self.enter(S::SetRight),
            (S::Idle, Button::Start, PressKind::Hold) => {
                self.enter(S::Weighing);
                self.scale.tare();
            }

            (S::Running, Button::Start, PressKind::Press) => {
                if std::mem::take(&mut self.suppress_start_press) {
                    tracing::debug!("start press swallowed after remote start");
                } else {
                    self.enter(S::Paused);
                }
            }

            (S::Paused | S::Empty, Button::Start, PressKind::Press) => self.resume_grind(),
            (S::Paused | S::Empty, Button::Left, PressKind::Press) => {
                self.select_and_leave(PresetId::Small);
            }
            (S::Paused | S::Empty, Button::Right, PressKind::Press) => {
                self.select_and_leave(PresetId::Large);
            }

            (S::SetLeft | S::SetRight, Button::Left, PressKind::Press) => self.adjust_preset(-1),
            (S::SetLeft | S::SetRight, Button::Right, PressKind::Press) => self.adjust_preset(1),
            (S::SetLeft | S::SetRight, Button::Start, PressKind::Press) => self.enter(S::Saving),

            (S::Weighing, Button::Start, PressKind::Hold) => self.enter(S::Idle),
            (S::Weighing, Button::Start, PressKind::Press) => self.scale.tare(),

            (S::Calibrate, Button::Start, PressKind::Press) => self.begin_calibration_capture(),
            (S::Calibrate, Button::Start, PressKind::Hold) => {
                tracing::info!("calibration aborted");
                self.enter(S::Idle);
            }

            (state, button, kind) => {
                tracing::trace!(%state, ?button, ?kind, "input ignored");
            }
        }
    }

    /// Apply a remote command. Rejected commands leave state untouched.
    pub fn handle_command(&mut self, cmd: RemoteCommand) -> Result<()> {
        use MachineState as S;
        tracing::debug!(?cmd, state = %self.state, "remote command");
        if self.state == S::Updating && cmd != RemoteCommand::AbortUpdate {
            return Err(reject_state(self.state, "update in progress"));
        }
        match cmd {
            RemoteCommand::Start => self.remote_start(),
            RemoteCommand::StartWithPreset(id) => {
                if !matches!(self.state, S::Idle | S::Paused | S::Empty) {
                    return Err(reject_state(self.state, "start"));
                }
                self.remote_select(id)?;
                self.remote_start()
            }
            RemoteCommand::SelectPreset(id) => self.remote_select(id),
            RemoteCommand::SetPresetTarget(id, dg) => {
                let clamped = clamp_preset_dg(dg);
                if i64::from(clamped) != dg {
                    tracing::warn!(preset = %id, requested_dg = dg, clamped_dg = clamped, "preset target clamped");
                }
                self.presets.set(id, clamped);
                if !self.state.in_session() && id == self.selected {
                    self.remaining_dg = clamped;
                }
                self.persist();
                self.log_presets();
                Ok(())
            }
            RemoteCommand::SetStallThreshold(g) => {
                if !valid_threshold(g, &self.cfg) {
                    return Err(eyre::Report::new(GrinderError::InvalidCommand(format!(
                        "stall threshold {g} outside [0, {}]",
                        self.cfg.stall.max_block_threshold_g
                    ))));
                }
                self.stall_threshold_g = g;
                tracing::info!(threshold_g = g, "stall threshold updated");
                self.persist();
                Ok(())
            }
            RemoteCommand::Calibrate => {
                if !matches!(self.state, S::Idle | S::Weighing | S::Paused | S::Empty) {
                    return Err(reject_state(self.state, "calibrate"));
                }
                self.session = None;
                self.enter(S::Calibrate);
                self.scale.tare();
                tracing::info!(
                    known_weight_g = self.cfg.scale.known_weight_g,
                    "calibration: place the reference weight and press start"
                );
                Ok(())
            }
            RemoteCommand::Tare => {
                if matches!(
                    self.state,
                    S::Running | S::Measuring | S::Finished | S::Saving
                ) {
                    return Err(reject_state(self.state, "tare"));
                }
                self.scale.tare();
                Ok(())
            }
            RemoteCommand::BeginUpdate => {
                self.session = None;
                self.enter(S::Updating);
                Ok(())
            }
            RemoteCommand::AbortUpdate => {
                if self.state != S::Updating {
                    return Err(reject_state(self.state, "abort update"));
                }
                self.enter(S::Idle);
                Ok(())
            }
        }
    }

    // ── Periodic evaluation ────────────────────────────────────────────────

    /// One control period. Returns the command for the actuator task.
    pub fn tick(&mut self) -> ActuatorCommand {
        let now = self.now_ms();
        match self.state {
            MachineState::Running => self.tick_running(now),
            MachineState::Measuring => {
                if now.saturating_sub(self.measuring_since_ms) >= self.cfg.control.settle_ms {
                    if self.target_reached() {
                        self.enter(MachineState::Finished);
                    } else {
                        tracing::debug!(weight_g = self.scale.read_grams(), "below target after settle");
                        if let Some(s) = self.session.as_mut() {
                            s.rearm(now);
                        }
                        self.enter(MachineState::Running);
                        self.tick_running(now);
                    }
                }
            }
            MachineState::Finished => {
                let weight = self.scale.read_grams();
                match self.selected {
                    PresetId::Small => self.small_runs = self.small_runs.saturating_add(1),
                    PresetId::Large => self.large_runs = self.large_runs.saturating_add(1),
                }
                self.total_weight_g += weight;
                if let Some(s) = &self.session {
                    tracing::info!(
                        target_g = s.target_g(),
                        dispensed_g = weight - s.start_weight_g,
                        weight_g = weight,
                        "grind complete"
                    );
                }
                self.enter(MachineState::Saving);
            }
            MachineState::Saving => {
                if now >= self.saving_until_ms {
                    self.enter(MachineState::Idle);
                }
            }
            _ => {}
        }
        if self.state != MachineState::Running {
            self.command = ActuatorCommand::Stop;
        }
        self.command
    }

    fn tick_running(&mut self, now: u64) {
        // The suppression window ends with the first running period.
        self.suppress_start_press = false;

        if self.target_reached() {
            self.enter(MachineState::Measuring);
            return;
        }

        let weight = self.scale.read_grams();
        let stall = self.cfg.stall.clone();
        let threshold = self.cfg.control.slowdown_threshold_g;
        let run = self.cfg.control.run_fraction;
        let slow = run * self.cfg.control.slowdown_fraction;

        let Some(s) = self.session.as_mut() else {
            tracing::error!("running without a session");
            self.enter(MachineState::Idle);
            return;
        };

        let mut give_up = false;
        match s.phase {
            Phase::Forward => {
                if now.saturating_sub(s.last_change_ms) >= stall.timeout_ms {
                    match stall.policy {
                        StallPolicy::FailFast => give_up = true,
                        StallPolicy::ReverseRetry if s.reverse_attempts < stall.max_reverse_attempts => {
                            s.reverse_attempts += 1;
                            s.last_change_ms = now;
                            s.phase = Phase::Reversing {
                                until_ms: now.saturating_add(stall.reverse_ms),
                            };
                            tracing::warn!(attempt = s.reverse_attempts, "stall detected, reversing");
                        }
                        StallPolicy::ReverseRetry => give_up = true,
                    }
                }
            }
            Phase::Reversing { until_ms } => {
                if now >= until_ms {
                    s.phase = Phase::Forward;
                    s.last_change_ms = now;
                }
            }
        }

        if give_up {
            tracing::warn!(attempts = s.reverse_attempts, policy = ?stall.policy, "blocked, giving up");
            s.reverse_attempts = 0;
            self.enter(MachineState::Empty);
            return;
        }

        self.command = match s.phase {
            Phase::Reversing { .. } => ActuatorCommand::Reverse(stall.reverse_fraction),
            Phase::Forward if s.target_g() - weight <= threshold => ActuatorCommand::Forward(slow),
            Phase::Forward => ActuatorCommand::Forward(run),
        };
    }

    fn target_reached(&self) -> bool {
        let target = self
            .session
            .as_ref()
            .map_or(self.remaining_dg, |s| s.target_dg);
        self.scale.read_grams() * 10.0 >= f32::from(target)
    }

    // ── Transitions ────────────────────────────────────────────────────────

    fn enter(&mut self, next: MachineState) {
        let from = self.state;
        if from == next {
            return;
        }
        self.state = next;
        self.calibration_capture = false;
        tracing::info!(%from, to = %next, "state change");
        let now = self.now_ms();
        match next {
            MachineState::Measuring => {
                self.measuring_since_ms = now;
                self.command = ActuatorCommand::Stop;
            }
            MachineState::Saving => {
                self.persist();
                self.saving_until_ms = now.saturating_add(self.cfg.control.saving_dwell_ms);
            }
            MachineState::Idle => {
                self.session = None;
                self.suppress_start_press = false;
                self.remaining_dg = self.presets.get(self.selected);
                self.log_presets();
            }
            MachineState::Empty | MachineState::Paused | MachineState::Updating => {
                self.command = ActuatorCommand::Stop;
            }
            _ => {}
        }
    }

    fn start_grind(&mut self) {
        self.scale.tare();
        let target = self.presets.get(self.selected);
        self.remaining_dg = target;
        self.session = Some(GrindSession::new(target, self.scale.read_grams(), self.now_ms()));
        tracing::info!(preset = %self.selected, target_dg = target, "grind start");
        self.enter(MachineState::Running);
    }

    fn resume_grind(&mut self) {
        let now = self.now_ms();
        match self.session.as_mut() {
            Some(s) => s.rearm(now),
            None => {
                let target = self.presets.get(self.selected);
                self.session = Some(GrindSession::new(target, self.scale.read_grams(), now));
            }
        }
        self.enter(MachineState::Running);
    }

    fn remote_start(&mut self) -> Result<()> {
        match self.state {
            MachineState::Idle => self.start_grind(),
            MachineState::Paused | MachineState::Empty => self.resume_grind(),
            other => return Err(reject_state(other, "start")),
        }
        self.suppress_start_press = self.cfg.control.suppress_release_after_remote_start;
        Ok(())
    }

    fn remote_select(&mut self, id: PresetId) -> Result<()> {
        match self.state {
            MachineState::Idle => self.select_from_idle(id),
            MachineState::Paused | MachineState::Empty => self.select_and_leave(id),
            other => return Err(reject_state(other, "select preset")),
        }
        Ok(())
    }

    fn select_from_idle(&mut self, id: PresetId) {
        self.selected = id;
        self.remaining_dg = self.presets.get(id);
        self.persist();
        self.scale.tare();
        self.log_presets();
    }

    fn select_and_leave(&mut self, id: PresetId) {
        self.selected = id;
        self.persist();
        self.enter(MachineState::Idle);
    }

    fn adjust_preset(&mut self, delta: i64) {
        let id = if self.state == MachineState::SetLeft {
            PresetId::Small
        } else {
            PresetId::Large
        };
        let next = clamp_preset_dg(i64::from(self.presets.get(id)) + delta);
        self.presets.set(id, next);
        tracing::debug!(preset = %id, target_dg = next, "preset adjusted");
    }

    /// Average only readings taken after the press, with the weight in place.
    fn begin_calibration_capture(&mut self) {
        if self.calibration_capture {
            return;
        }
        self.scale.restart_window();
        self.calibration_capture = true;
        tracing::info!(
            samples = self.cfg.scale.calibration_samples,
            "calibration: sampling reference weight"
        );
    }

    fn finish_calibration(&mut self) {
        let Some(net_raw) = self.scale.mean_net_raw() else {
            tracing::error!("calibration: no scale samples yet");
            return;
        };
        let factor = (net_raw / f64::from(self.cfg.scale.known_weight_g)) as f32;
        if !factor.is_finite() || factor == 0.0 {
            tracing::error!(factor, net_raw, "calibration rejected: unusable factor");
            return;
        }
        tracing::info!(factor, net_raw, "calibration factor set");
        self.scale.set_scale_factor(factor);
        self.enter(MachineState::Saving);
    }

    fn persist(&mut self) {
        let state = PersistedState {
            small_dg: self.presets.small_dg,
            large_dg: self.presets.large_dg,
            selected: self.selected.index(),
            scale_factor: self.scale.scale_factor(),
            small_runs: self.small_runs,
            large_runs: self.large_runs,
            total_weight_g: self.total_weight_g,
            block_threshold_g: self.stall_threshold_g,
        };
        if let Err(e) = self.store.save(&state) {
            tracing::error!(error = %e, "persisting state failed");
        }
    }

    fn log_presets(&self) {
        tracing::info!(
            preset = %self.selected,
            small_g = f32::from(self.presets.small_dg) / 10.0,
            large_g = f32::from(self.presets.large_dg) / 10.0,
            remaining_dg = self.remaining_dg,
            "presets"
        );
    }
}

fn valid_threshold(g: f32, cfg: &ControllerCfg) -> bool {
    g.is_finite() && g >= 0.0 && g <= cfg.stall.max_block_threshold_g
}

fn reject_state(state: MachineState, what: &str) -> eyre::Report {
    eyre::Report::new(GrinderError::State(format!("{what} not allowed in {state}")))
}
