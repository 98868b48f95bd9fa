#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! `grinder`: run, grind, calibrate and inspect the grinder controller.

mod cli;
mod commands;
mod error_fmt;
mod machine;
mod rt;

use std::time::Duration;

use clap::Parser;
use grinder_config::{Config, Logging};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::commands::CliError;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if !cli.json {
        let _ = color_eyre::install();
    }
    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", error_fmt::format_error_json(&err));
        } else {
            eprintln!("{}", error_fmt::humanize(&err));
        }
        tracing::debug!(error = ?err, "exiting with error");
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}

fn config_error(e: &eyre::Report) -> eyre::Report {
    eyre::Report::new(CliError::Config(format!("{e:#}")))
}

fn load_config(cli: &Cli) -> eyre::Result<Config> {
    let mut cfg = grinder_config::load_file(&cli.config).map_err(|e| config_error(&e))?;
    if let Commands::Calibrate {
        known_weight: Some(w),
    } = cli.cmd
    {
        if !(w.is_finite() && w > 0.0) {
            return Err(eyre::Report::new(CliError::Config(format!(
                "--known-weight must be > 0 (got {w})"
            ))));
        }
        cfg.scale.known_weight_g = w;
    }
    Ok(cfg)
}

/// RUST_LOG wins, then --log-level, then `[logging] level`, then info.
fn env_filter(cli: &Cli, logging: &Logging) -> eyre::Result<EnvFilter> {
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(EnvFilter::from_default_env());
    }
    let level = cli
        .log_level
        .as_deref()
        .or(logging.level.as_deref())
        .unwrap_or("info");
    EnvFilter::try_new(level).map_err(|e| config_error(&eyre::eyre!("log level {level:?}: {e}")))
}

fn init_tracing(cli: &Cli, logging: &Logging) -> eyre::Result<()> {
    let filter = env_filter(cli, logging)?;

    let file_layer = match logging.file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| config_error(&eyre::eyre!("logging.file has no file name")))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "never" => tracing_appender::rolling::never(dir, name),
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                other => {
                    return Err(config_error(&eyre::eyre!(
                        "logging.rotation must be never, daily or hourly (got {other:?})"
                    )));
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let (json_layer, compact_layer) = if cli.json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().compact().with_writer(std::io::stderr)))
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(compact_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli)?;
    init_tracing(&cli, &cfg.logging)?;
    let state_file = machine::state_path(&cfg, cli.state_file.as_deref());
    tracing::debug!(config = %cli.config.display(), state = %state_file.display(), "starting");

    match cli.cmd {
        Commands::Run { rt, duration_s } => {
            rt::apply(rt);
            let assembly = machine::spawn(&cfg, &state_file)?;
            let result = commands::run(
                &assembly.machine.handle(),
                duration_s.map(Duration::from_secs),
                cli.json,
            );
            assembly.machine.shutdown();
            result
        }
        Commands::Grind {
            preset,
            timeout_s,
            rt,
        } => {
            rt::apply(rt);
            let assembly = machine::spawn(&cfg, &state_file)?;
            let result = commands::grind(&assembly.machine.handle(), preset.into(), timeout_s);
            assembly.machine.shutdown();
            let snap = result?;
            if cli.json {
                println!("{}", serde_json::to_string(&snap)?);
            } else {
                println!(
                    "ground {:.1} g ({}) | runs small={} large={} | total {:.1} g",
                    snap.current_weight_g,
                    snap.selected_preset,
                    snap.small_runs,
                    snap.large_runs,
                    snap.total_weight_g
                );
            }
            Ok(())
        }
        Commands::Calibrate { .. } => {
            let assembly = machine::spawn(&cfg, &state_file)?;
            let result = commands::calibrate(&assembly, &cfg);
            assembly.machine.shutdown();
            let factor = result?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "scale_factor": factor,
                        "known_weight_g": cfg.scale.known_weight_g,
                    })
                );
            } else {
                println!("scale factor {factor:.2} counts/g");
            }
            Ok(())
        }
        Commands::State => commands::print_state(&cfg, &state_file, cli.json),
        Commands::SelfCheck { samples } => {
            commands::self_check(&cfg, &state_file, samples, cli.json)
        }
    }
}
