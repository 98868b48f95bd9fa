//! Subcommand bodies. Each one drives a running `Machine` through its handle.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use grinder_config::Config;
use grinder_core::hw_error::map_boxed;
use grinder_core::{
    Button, ButtonEvent, MachineHandle, MachineState, PresetId, PresetStore, Snapshot,
};
use grinder_ui::{TopicDiff, parse_command};
use thiserror::Error;

use crate::machine::{self, Assembly};

const POLL: Duration = Duration::from_millis(20);
const PUBLISH_EVERY: Duration = Duration::from_millis(100);

/// Outcomes the CLI reports with dedicated exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("grind stopped: hopper empty or grinder jammed")]
    GrindEmpty,
    #[error("grind did not finish within {0} s")]
    GrindDeadline(u64),
    #[error("calibration was not accepted")]
    CalibrationFailed,
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Wait until the machine has published its first snapshot.
fn wait_ready(handle: &MachineHandle, within: Duration) -> eyre::Result<()> {
    let telemetry = handle.telemetry();
    let deadline = Instant::now() + within;
    while telemetry.version() == 0 {
        if Instant::now() >= deadline {
            eyre::bail!("machine did not report within {} ms", within.as_millis());
        }
        std::thread::sleep(POLL);
    }
    Ok(())
}

fn runs_of(snap: &Snapshot, id: PresetId) -> u32 {
    match id {
        PresetId::Small => snap.small_runs,
        PresetId::Large => snap.large_runs,
    }
}

/// Grind one preset and return the snapshot once the machine is Idle again.
pub fn grind(handle: &MachineHandle, preset: PresetId, timeout_s: u64) -> eyre::Result<Snapshot> {
    wait_ready(handle, Duration::from_secs(5))?;
    let before = runs_of(&handle.snapshot(), preset);
    handle.start_with_preset(preset)?;
    tracing::info!(%preset, timeout_s, "grind started");

    let deadline = Instant::now() + Duration::from_secs(timeout_s);
    loop {
        let snap = handle.snapshot();
        match snap.state {
            MachineState::Empty => {
                tracing::warn!(weight_g = snap.current_weight_g, "grind ended empty");
                return Err(eyre::Report::new(CliError::GrindEmpty));
            }
            MachineState::Idle if runs_of(&snap, preset) > before => {
                tracing::info!(
                    %preset,
                    weight_g = snap.current_weight_g,
                    total_weight_g = snap.total_weight_g,
                    "grind complete"
                );
                return Ok(snap);
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            let _ = handle.input(ButtonEvent::press(Button::Start));
            return Err(eyre::Report::new(CliError::GrindDeadline(timeout_s)));
        }
        std::thread::sleep(POLL);
    }
}

/// Time for the calibration window to hold only fresh samples.
fn window_time(cfg: &Config) -> Duration {
    let hz = cfg.scale.sample_rate_hz.max(1);
    let samples = u32::try_from(cfg.scale.calibration_samples).unwrap_or(u32::MAX);
    Duration::from_millis(u64::from(samples) * 1000 / u64::from(hz)) + Duration::from_millis(300)
}

fn wait_state(
    handle: &MachineHandle,
    within: Duration,
    pred: impl Fn(MachineState) -> bool,
) -> Option<Snapshot> {
    let deadline = Instant::now() + within;
    loop {
        let snap = handle.snapshot();
        if pred(snap.state) {
            return Some(snap);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL);
    }
}

/// Tare, load the reference weight, confirm. Returns the new scale factor.
pub fn calibrate(assembly: &Assembly, cfg: &Config) -> eyre::Result<f32> {
    let handle = assembly.machine.handle();
    wait_ready(&handle, Duration::from_secs(5))?;
    let window = window_time(cfg);
    // Let the empty platform settle before the tare.
    std::thread::sleep(window);
    handle.calibrate()?;

    let known = cfg.scale.known_weight_g;
    if assembly.place_mass(known) {
        tracing::info!(known_weight_g = known, "reference weight placed on simulated scale");
    } else {
        eprintln!("Place the {known:.2} g reference weight on the scale, then press Enter.");
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
    }
    handle.input(ButtonEvent::press(Button::Start))?;

    // The factor comes from a full window of readings taken after the press.
    match wait_state(&handle, window + Duration::from_secs(2), |s| {
        matches!(s, MachineState::Saving | MachineState::Idle)
    }) {
        Some(snap) => {
            // Saving persists on its way back to Idle.
            let _ = wait_state(&handle, Duration::from_secs(10), |s| s == MachineState::Idle);
            tracing::info!(scale_factor = snap.scale_factor, "calibration stored");
            Ok(snap.scale_factor)
        }
        None => {
            let _ = handle.input(ButtonEvent::hold(Button::Start));
            Err(eyre::Report::new(CliError::CalibrationFailed))
        }
    }
}

/// Print the persisted state without starting the machine.
pub fn print_state(cfg: &Config, state_file: &Path, json: bool) -> eyre::Result<()> {
    let state = machine::open_store(cfg, state_file, None).load()?;
    if json {
        println!("{}", serde_json::to_string(&state)?);
    } else {
        print!("{}", toml::to_string_pretty(&state)?);
    }
    Ok(())
}

/// Read `samples` raw conversions and report how many succeeded.
pub fn self_check(cfg: &Config, state_file: &Path, samples: u32, json: bool) -> eyre::Result<()> {
    let mut scale = machine::open_scale(cfg, state_file)?;
    let timeout = Duration::from_millis(cfg.scale.read_timeout_ms);
    let mut readings = Vec::new();
    let mut last_err = None;
    for _ in 0..samples {
        match scale.read(timeout) {
            Ok(raw) => readings.push(raw),
            Err(e) => {
                tracing::warn!(error = %e, "scale read failed");
                last_err = Some(e);
            }
        }
    }
    if readings.is_empty()
        && let Some(e) = last_err
    {
        return Err(eyre::Report::new(map_boxed(&e)));
    }
    if json {
        println!(
            "{}",
            serde_json::json!({ "samples": samples, "ok": readings.len(), "raw": readings })
        );
    } else {
        println!("scale: {}/{samples} reads ok, raw {readings:?}", readings.len());
    }
    Ok(())
}

fn spawn_stdin_reader(handle: MachineHandle) {
    let spawned = std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (topic, payload) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
                match parse_command(topic, payload.trim()) {
                    Ok(cmd) => {
                        if let Err(e) = handle.send(cmd) {
                            tracing::warn!(topic, error = %e, "command rejected");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring input line"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "stdin reader not started");
    }
}

/// Run until Ctrl-C (or `duration`), echoing changed topics to stdout.
pub fn run(handle: &MachineHandle, duration: Option<Duration>, json: bool) -> eyre::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }
    spawn_stdin_reader(handle.clone());

    let started = Instant::now();
    let mut diff = TopicDiff::new();
    while !stop.load(Ordering::SeqCst) {
        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        for update in diff.diff(&handle.snapshot()) {
            if json {
                println!("{}", serde_json::to_string(&update)?);
            } else {
                println!("{} {}", update.topic, update.payload);
            }
        }
        std::thread::sleep(PUBLISH_EVERY);
    }
    tracing::info!(uptime_s = started.elapsed().as_secs(), "stopping");
    Ok(())
}
