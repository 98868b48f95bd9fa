//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use grinder_core::PresetId;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "grinder", version, about = "Closed-loop coffee grinder controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/grinder.toml")]
    pub config: PathBuf,

    /// Override the persisted-state file from the config
    #[arg(long, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Log and print as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

/// Real-time knobs shared by the commands that run the machine.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on Linux.\n\nAttempts SCHED_FIFO priority and mlockall before the control tasks are spawned, so every task thread inherits the policy. Needs CAP_SYS_NICE / CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'. Ignored on other platforms."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority when --rt is enabled (clamped to the system range)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt
    #[arg(long, value_enum, value_name = "MODE", default_value = "current")]
    pub rt_lock: RtLock,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PresetArg {
    /// Left button preset
    Small,
    /// Right button preset
    Large,
}

impl From<PresetArg> for PresetId {
    fn from(p: PresetArg) -> Self {
        match p {
            PresetArg::Small => Self::Small,
            PresetArg::Large => Self::Large,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the machine until Ctrl-C; reads `topic [payload]` commands from stdin
    Run {
        #[command(flatten)]
        rt: RtArgs,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, value_name = "SECS")]
        duration_s: Option<u64>,
    },
    /// Grind one preset from Idle back to Idle
    Grind {
        #[arg(long, value_enum, default_value = "small")]
        preset: PresetArg,
        /// Give up if the grind has not finished after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 120)]
        timeout_s: u64,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Calibrate the scale against a reference weight
    Calibrate {
        /// Reference weight in grams (defaults to scale.known_weight_g)
        #[arg(long, value_name = "GRAMS")]
        known_weight: Option<f32>,
    },
    /// Print the persisted presets, counters and calibration
    State,
    /// Read a few scale samples and report
    SelfCheck {
        #[arg(long, default_value_t = 5)]
        samples: u32,
    },
}
