//! Task wiring: sampler, input poller, actuator output and control loop.
//!
//! Every piece of shared state has exactly one writer:
//! - raw scale counts flow from the sampler thread over a bounded channel;
//! - button events and remote commands flow into the control thread as
//!   `ControlMsg`s;
//! - the control thread alone mutates the controller and publishes the
//!   telemetry snapshot;
//! - the actuator thread alone drives the motor and publishes its signed
//!   output through an atomic.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use grinder_traits::{ButtonPanel, Clock, Scale};

use crate::actuator::{ActuatorCommand, MotorActuator, OutputBackend};
use crate::command::RemoteCommand;
use crate::config::GrinderCfg;
use crate::controller::GrindController;
use crate::error::{BuildError, GrinderError, Result};
use crate::input::{ButtonEvent, InputClassifier};
use crate::sampler::Sampler;
use crate::state::PresetId;
use crate::store::PresetStore;
use crate::telemetry::{Snapshot, TelemetryCell, TelemetryReader};
use crate::util::{period_ms, period_us};

/// How long a handle waits for the control thread to answer a command.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
/// How long the control thread waits for the actuator to acknowledge a suspend.
const SUSPEND_TIMEOUT: Duration = Duration::from_millis(500);
/// Control inbox capacity. Senders block (handles time out) once it is full.
pub const CONTROL_QUEUE: usize = 64;
/// Actuator inbox capacity. Commands are retried next loop when it is full.
const ACTUATOR_QUEUE: usize = 16;

pub enum ControlMsg {
    Input(ButtonEvent),
    Remote {
        cmd: RemoteCommand,
        reply: Option<xch::Sender<Result<()>>>,
    },
    /// Enter `Updating`; `ready` fires once the actuator is parked.
    BeginUpdate { ready: xch::Sender<Result<()>> },
    AbortUpdate,
    Shutdown,
}

enum ActuatorMsg {
    Command(ActuatorCommand),
    Suspend(xch::Sender<()>),
    Resume,
    Shutdown,
}

/// Boxed actuator backend as accepted by the builder.
pub type DynBackend = Box<dyn OutputBackend + Send>;

/// Collects the hardware and starts the machine.
pub struct MachineBuilder {
    cfg: GrinderCfg,
    scale: Option<Box<dyn Scale + Send>>,
    backend: Option<DynBackend>,
    buttons: Option<Box<dyn ButtonPanel + Send>>,
    store: Option<Box<dyn PresetStore + Send>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl MachineBuilder {
    pub fn new(cfg: GrinderCfg) -> Self {
        Self {
            cfg,
            scale: None,
            backend: None,
            buttons: None,
            store: None,
            clock: Arc::new(grinder_traits::MonotonicClock::new()),
        }
    }

    pub fn scale(mut self, scale: impl Scale + Send + 'static) -> Self {
        self.scale = Some(Box::new(scale));
        self
    }

    pub fn backend(mut self, backend: impl OutputBackend + Send + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn buttons(mut self, buttons: impl ButtonPanel + Send + 'static) -> Self {
        self.buttons = Some(Box::new(buttons));
        self
    }

    pub fn store(mut self, store: impl PresetStore + Send + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate, then spawn all tasks.
    pub fn spawn(self) -> Result<Machine> {
        let scale = self.scale.ok_or(BuildError::MissingScale)?;
        let backend = self.backend.ok_or(BuildError::MissingActuator)?;
        let buttons = self.buttons.ok_or(BuildError::MissingButtons)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        if self.cfg.ramp.tick_hz == 0
            || self.cfg.controller.control.loop_hz == 0
            || self.cfg.controller.scale.sample_rate_hz == 0
            || self.cfg.input.poll_hz == 0
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "task rates must be > 0",
            )));
        }
        spawn(self.cfg, scale, backend, buttons, store, self.clock)
    }
}

/// Running machine. Dropping it shuts every task down.
pub struct Machine {
    handle: MachineHandle,
    threads: Vec<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine").finish_non_exhaustive()
    }
}

/// Start the machine with already-boxed collaborators.
pub fn spawn(
    cfg: GrinderCfg,
    scale: Box<dyn Scale + Send>,
    backend: DynBackend,
    buttons: Box<dyn ButtonPanel + Send>,
    store: Box<dyn PresetStore + Send>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<Machine> {
    let controller = GrindController::new(cfg.controller.clone(), store, clock.clone())?;

    let (ctl_tx, ctl_rx) = xch::bounded::<ControlMsg>(CONTROL_QUEUE);
    let (act_tx, act_rx) = xch::bounded::<ActuatorMsg>(ACTUATOR_QUEUE);
    let (publisher, reader) = TelemetryCell::new();
    let output_bits = Arc::new(AtomicU32::new(0f32.to_bits()));
    let stop_flag = Arc::new(AtomicBool::new(false));

    let mut threads = Vec::with_capacity(3);

    // Actuator output task.
    {
        let mut actuator = MotorActuator::new(backend, &cfg.ramp);
        let output_bits = output_bits.clone();
        let period = Duration::from_micros(period_us(cfg.ramp.tick_hz));
        let clock = clock.clone();
        threads.push(named("grinder-actuator", move || {
            actuator_task(&mut actuator, &act_rx, &output_bits, period, clock.as_ref());
        })?);
    }

    // Input task.
    {
        let mut classifier = InputClassifier::new(&cfg.input);
        let mut buttons = buttons;
        let tx = ctl_tx.clone();
        let stop = stop_flag.clone();
        let clock = clock.clone();
        let period = Duration::from_millis(period_ms(cfg.input.poll_hz));
        threads.push(named("grinder-input", move || {
            let epoch = clock.now();
            let mut last_err: Option<String> = None;
            while !stop.load(Ordering::Relaxed) {
                match buttons.levels() {
                    Ok(levels) => {
                        last_err = None;
                        for ev in classifier.poll(levels, clock.ms_since(epoch)) {
                            tracing::debug!(?ev, "button event");
                            if tx.send(ControlMsg::Input(ev)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        if last_err.as_deref() != Some(msg.as_str()) {
                            tracing::warn!(error = %msg, "button read failed");
                            last_err = Some(msg);
                        }
                    }
                }
                clock.sleep(period);
            }
        })?);
    }

    // Control task; owns the sampler so it is joined when the loop exits.
    {
        let sampler = Sampler::spawn(
            scale,
            cfg.controller.scale.sample_rate_hz,
            Duration::from_millis(cfg.controller.scale.read_timeout_ms),
            ArcClock(clock.clone()),
        );
        let period = Duration::from_millis(period_ms(cfg.controller.control.loop_hz));
        let output_bits = output_bits.clone();
        let clock = clock.clone();
        threads.push(named("grinder-control", move || {
            let mut task = ControlTask {
                controller,
                sampler,
                actuator: act_tx,
                publisher,
                output_bits,
                last_cmd: None,
                seen_errors: 0,
                suspended: false,
            };
            task.run(&ctl_rx, period, clock.as_ref());
        })?);
    }

    tracing::info!(
        loop_hz = cfg.controller.control.loop_hz,
        sample_hz = cfg.controller.scale.sample_rate_hz,
        tick_hz = cfg.ramp.tick_hz,
        "machine started"
    );

    Ok(Machine {
        handle: MachineHandle {
            tx: ctl_tx,
            telemetry: reader,
        },
        threads,
        stop_flag,
    })
}

fn named<F: FnOnce() + Send + 'static>(name: &str, f: F) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| eyre::Report::new(GrinderError::Io(format!("spawn {name}: {e}"))))
}

/// Adapter so the sampler, which wants an owned `Clock`, can share ours.
struct ArcClock(Arc<dyn Clock + Send + Sync>);

impl Clock for ArcClock {
    fn now(&self) -> Instant {
        self.0.now()
    }
    fn sleep(&self, d: Duration) {
        self.0.sleep(d);
    }
}

fn actuator_task<B: OutputBackend>(
    actuator: &mut MotorActuator<B>,
    rx: &xch::Receiver<ActuatorMsg>,
    output_bits: &AtomicU32,
    period: Duration,
    clock: &dyn Clock,
) {
    let mut suspended = false;
    let mut failing = false;
    loop {
        loop {
            let msg = match rx.try_recv() {
                Ok(msg) => msg,
                Err(xch::TryRecvError::Empty) => break,
                Err(xch::TryRecvError::Disconnected) => ActuatorMsg::Shutdown,
            };
            match msg {
                ActuatorMsg::Command(cmd) => actuator.set_target(cmd),
                ActuatorMsg::Suspend(ack) => {
                    if let Err(e) = actuator.halt() {
                        tracing::error!(error = %e, "halt failed while suspending");
                    }
                    suspended = true;
                    output_bits.store(0f32.to_bits(), Ordering::Relaxed);
                    tracing::info!("actuator suspended");
                    let _ = ack.send(());
                }
                ActuatorMsg::Resume => {
                    suspended = false;
                    tracing::info!("actuator resumed");
                }
                ActuatorMsg::Shutdown => {
                    if let Err(e) = actuator.halt() {
                        tracing::error!(error = %e, "halt failed during shutdown");
                    }
                    output_bits.store(0f32.to_bits(), Ordering::Relaxed);
                    return;
                }
            }
        }
        if !suspended {
            match actuator.tick() {
                Ok(()) => failing = false,
                Err(e) => {
                    if !failing {
                        tracing::error!(error = %e, "actuator output failed");
                    }
                    failing = true;
                }
            }
            output_bits.store(actuator.current_output().to_bits(), Ordering::Relaxed);
        }
        clock.sleep(period);
    }
}

struct ControlTask<P: PresetStore> {
    controller: GrindController<P>,
    sampler: Sampler,
    actuator: xch::Sender<ActuatorMsg>,
    publisher: crate::telemetry::TelemetryPublisher,
    output_bits: Arc<AtomicU32>,
    last_cmd: Option<ActuatorCommand>,
    seen_errors: u64,
    suspended: bool,
}

impl<P: PresetStore> ControlTask<P> {
    fn run(&mut self, rx: &xch::Receiver<ControlMsg>, period: Duration, clock: &dyn Clock) {
        loop {
            let started = clock.now();
            for msg in rx.try_iter() {
                if !self.handle(msg) {
                    let _ = self.actuator.send(ActuatorMsg::Shutdown);
                    tracing::info!("control loop stopped");
                    return;
                }
            }

            if let Some(raw) = self.sampler.latest() {
                self.controller.on_sample(raw);
            }
            let errors = self.sampler.error_count();
            for _ in self.seen_errors..errors {
                self.controller.on_sensor_fault();
            }
            self.seen_errors = errors;

            let cmd = self.controller.tick();
            if !self.suspended && self.last_cmd != Some(cmd) {
                tracing::debug!(?cmd, "actuator command");
                match self.actuator.try_send(ActuatorMsg::Command(cmd)) {
                    Ok(()) => self.last_cmd = Some(cmd),
                    Err(xch::TrySendError::Full(_)) => {
                        tracing::warn!(?cmd, "actuator inbox full, retrying next loop");
                    }
                    Err(xch::TrySendError::Disconnected(_)) => {}
                }
            }
            self.publish();

            let spent = clock.now().saturating_duration_since(started);
            clock.sleep(period.saturating_sub(spent));
        }
    }

    /// Returns false when the loop must exit.
    fn handle(&mut self, msg: ControlMsg) -> bool {
        match msg {
            ControlMsg::Input(ev) => self.controller.handle_input(ev),
            ControlMsg::Remote { cmd, reply } => {
                let res = match cmd {
                    RemoteCommand::BeginUpdate => self.begin_update(),
                    RemoteCommand::AbortUpdate => self.abort_update(),
                    other => self.controller.handle_command(other),
                };
                if let Err(e) = &res {
                    tracing::warn!(?cmd, error = %e, "remote command rejected");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(res);
                }
            }
            ControlMsg::BeginUpdate { ready } => {
                let res = self.begin_update();
                let _ = ready.send(res);
            }
            ControlMsg::AbortUpdate => {
                if let Err(e) = self.abort_update() {
                    tracing::warn!(error = %e, "abort update rejected");
                }
            }
            ControlMsg::Shutdown => return false,
        }
        true
    }

    fn begin_update(&mut self) -> Result<()> {
        self.controller.handle_command(RemoteCommand::BeginUpdate)?;
        let (ack_tx, ack_rx) = xch::bounded(1);
        self.actuator
            .send(ActuatorMsg::Suspend(ack_tx))
            .map_err(|_| GrinderError::State("actuator task gone".into()))?;
        ack_rx
            .recv_timeout(SUSPEND_TIMEOUT)
            .map_err(|_| GrinderError::Timeout)?;
        self.suspended = true;
        self.last_cmd = Some(ActuatorCommand::Stop);
        self.publish();
        tracing::info!("actuator parked, ready for update");
        Ok(())
    }

    fn abort_update(&mut self) -> Result<()> {
        self.controller.handle_command(RemoteCommand::AbortUpdate)?;
        self.suspended = false;
        let _ = self.actuator.send(ActuatorMsg::Command(ActuatorCommand::Stop));
        let _ = self.actuator.send(ActuatorMsg::Resume);
        self.last_cmd = Some(ActuatorCommand::Stop);
        Ok(())
    }

    fn publish(&self) {
        let mut snap = self.controller.snapshot();
        snap.motor_output = f32::from_bits(self.output_bits.load(Ordering::Relaxed));
        self.publisher.publish(&snap);
    }
}

impl Machine {
    pub fn handle(&self) -> MachineHandle {
        self.handle.clone()
    }

    /// Stop all tasks and wait for them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Err(e) = self.handle.post(ControlMsg::Shutdown) {
            tracing::warn!(error = %e, "control task did not take the shutdown request");
        }
        for t in self.threads.drain(..) {
            if let Err(e) = t.join() {
                tracing::warn!(?e, "task panicked during shutdown");
            }
        }
        tracing::info!("machine stopped");
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable command/telemetry handle for presentation front ends.
#[derive(Clone)]
pub struct MachineHandle {
    tx: xch::Sender<ControlMsg>,
    telemetry: TelemetryReader,
}

impl MachineHandle {
    /// Send a remote command and wait for the controller's verdict.
    pub fn send(&self, cmd: RemoteCommand) -> Result<()> {
        let (reply_tx, reply_rx) = xch::bounded(1);
        self.post(ControlMsg::Remote {
            cmd,
            reply: Some(reply_tx),
        })?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| GrinderError::Timeout)?
    }

    pub fn start(&self) -> Result<()> {
        self.send(RemoteCommand::Start)
    }

    pub fn start_with_preset(&self, id: PresetId) -> Result<()> {
        self.send(RemoteCommand::StartWithPreset(id))
    }

    pub fn select_preset(&self, id: PresetId) -> Result<()> {
        self.send(RemoteCommand::SelectPreset(id))
    }

    pub fn set_preset_target(&self, id: PresetId, deci_grams: i64) -> Result<()> {
        self.send(RemoteCommand::SetPresetTarget(id, deci_grams))
    }

    pub fn set_stall_threshold(&self, grams: f32) -> Result<()> {
        self.send(RemoteCommand::SetStallThreshold(grams))
    }

    pub fn calibrate(&self) -> Result<()> {
        self.send(RemoteCommand::Calibrate)
    }

    pub fn tare(&self) -> Result<()> {
        self.send(RemoteCommand::Tare)
    }

    /// Park the machine for a firmware update. `ready` receives the outcome
    /// once the actuator task has stopped the motor.
    pub fn begin_update(&self, ready: xch::Sender<Result<()>>) -> Result<()> {
        self.post(ControlMsg::BeginUpdate { ready })
    }

    pub fn abort_update(&self) -> Result<()> {
        self.post(ControlMsg::AbortUpdate)
    }

    /// Inject a classified button event, as a front end without GPIO would.
    pub fn input(&self, ev: ButtonEvent) -> Result<()> {
        self.post(ControlMsg::Input(ev))
    }

    pub fn shutdown(&self) {
        let _ = self.post(ControlMsg::Shutdown);
    }

    /// Queue a message, waiting up to the reply timeout for inbox space.
    fn post(&self, msg: ControlMsg) -> Result<()> {
        self.tx.send_timeout(msg, REPLY_TIMEOUT).map_err(|e| match e {
            xch::SendTimeoutError::Timeout(_) => eyre::Report::new(GrinderError::Timeout),
            xch::SendTimeoutError::Disconnected(_) => {
                eyre::Report::new(GrinderError::State("machine stopped".into()))
            }
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.telemetry.snapshot()
    }

    pub fn telemetry(&self) -> TelemetryReader {
        self.telemetry.clone()
    }
}
