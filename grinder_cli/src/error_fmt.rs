//! Human-readable error descriptions, exit codes and structured JSON errors.

use grinder_core::{BuildError, GrinderError};

use crate::commands::CliError;

pub const EXIT_GENERIC: i32 = 1;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_EMPTY: i32 = 4;
pub const EXIT_DEADLINE: i32 = 5;
pub const EXIT_HARDWARE: i32 = 6;
pub const EXIT_PERSISTENCE: i32 = 7;

/// Map an `eyre::Report` to an explanation with likely causes and a fix hint.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::GrindEmpty => "What happened: The grind stopped in EMPTY.\nLikely causes: Hopper ran out of beans, or the burrs jammed and reverse retries did not clear them.\nHow to fix: Refill or clear the grinder, then start again; tune [stall] if this happens with beans present.".to_string(),
            CliError::GrindDeadline(s) => format!(
                "What happened: The grind did not finish within {s} s.\nLikely causes: Very low delivery rate, a large preset, or a scale that never reaches the target.\nHow to fix: Raise --timeout-s, check the calibration with `grinder state`, or recalibrate."
            ),
            CliError::CalibrationFailed => "What happened: The calibration factor was rejected.\nLikely causes: No reference weight on the platform, or the scale reported no samples.\nHow to fix: Place the reference weight, check the HX711 wiring and run `grinder calibrate` again.".to_string(),
            CliError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing file, TOML syntax error, or an out-of-range value.\nHow to fix: Edit the config file and rerun."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingScale => "What happened: No scale was wired into the machine.\nLikely causes: The HX711 failed to initialize.\nHow to fix: Check [pins] hx711_dt / hx711_sck and GPIO permissions.".to_string(),
            BuildError::MissingActuator => "What happened: No motor backend was wired into the machine.\nLikely causes: The stepper or ESC failed to initialize.\nHow to fix: Check [actuator] kind and the matching [pins] entries.".to_string(),
            BuildError::MissingButtons => "What happened: No button panel was wired into the machine.\nLikely causes: The button GPIOs failed to initialize.\nHow to fix: Check [pins] btn_left / btn_right / btn_start.".to_string(),
            BuildError::MissingStore => "What happened: No state store was configured.\nHow to fix: Set [store] path in the config.".to_string(),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A zero rate or out-of-range value in the TOML.\nHow to fix: Edit the config file and rerun."
            ),
        };
    }

    if let Some(ge) = err.downcast_ref::<GrinderError>() {
        return match ge {
            GrinderError::Timeout => "What happened: Scale read timed out.\nLikely causes: HX711 not wired correctly, no power/ground, or timeout too low.\nHow to fix: Verify DT/SCK pins and power, and consider raising scale.read_timeout_ms.".to_string(),
            GrinderError::Persistence(msg) => format!(
                "What happened: The state file could not be read or written ({msg}).\nLikely causes: Corrupt TOML or a read-only directory.\nHow to fix: Fix or delete the state file; defaults are used when it is missing."
            ),
            GrinderError::State(msg) => format!(
                "What happened: The machine refused the request ({msg}).\nHow to fix: Wait for IDLE or abort the current operation, then retry."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open hx711") || lower.contains("open motor pins") || lower.contains("open button pins") {
        return "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process may access GPIO.".to_string();
    }

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid or incomplete ({msg}).\nHow to fix: Edit the TOML config and try again."
        );
    }

    format!(
        "Something went wrong: {msg}\nHow to fix: Re-run with --log-level=debug for details."
    )
}

/// Stable exit codes for scripted callers.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::GrindEmpty => EXIT_EMPTY,
            CliError::GrindDeadline(_) => EXIT_DEADLINE,
            CliError::CalibrationFailed => EXIT_GENERIC,
            CliError::Config(_) => EXIT_CONFIG,
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return EXIT_CONFIG;
    }
    if let Some(ge) = err.downcast_ref::<GrinderError>() {
        return match ge {
            GrinderError::Config(_) => EXIT_CONFIG,
            GrinderError::Timeout | GrinderError::Hardware(_) | GrinderError::HardwareFault(_) => {
                EXIT_HARDWARE
            }
            GrinderError::Persistence(_) => EXIT_PERSISTENCE,
            _ => EXIT_GENERIC,
        };
    }
    if format!("{err:#}").to_ascii_lowercase().contains("invalid configuration") {
        return EXIT_CONFIG;
    }
    EXIT_GENERIC
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::GrindEmpty => "Empty",
            CliError::GrindDeadline(_) => "Deadline",
            CliError::CalibrationFailed => "Calibration",
            CliError::Config(_) => "Config",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<GrinderError>() {
        Some(GrinderError::Timeout) => "Timeout",
        Some(GrinderError::Hardware(_) | GrinderError::HardwareFault(_)) => "Hardware",
        Some(GrinderError::Persistence(_)) => "Persistence",
        Some(GrinderError::State(_)) => "State",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let mut obj = serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(CliError::GrindDeadline(s)) = err.downcast_ref::<CliError>() {
        obj["details"] = serde_json::json!({ "timeout_s": s });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(eyre::Report::new(CliError::GrindEmpty), EXIT_EMPTY, "Empty")]
    #[case(eyre::Report::new(CliError::GrindDeadline(3)), EXIT_DEADLINE, "Deadline")]
    #[case(eyre::Report::new(CliError::Config("x".into())), EXIT_CONFIG, "Config")]
    #[case(eyre::Report::new(GrinderError::Timeout), EXIT_HARDWARE, "Timeout")]
    #[case(eyre::Report::new(GrinderError::Persistence("ro".into())), EXIT_PERSISTENCE, "Persistence")]
    #[case(eyre::Report::new(BuildError::MissingScale), EXIT_CONFIG, "Config")]
    #[case(eyre::eyre!("boom"), EXIT_GENERIC, "Error")]
    fn codes_and_reasons(#[case] err: eyre::Report, #[case] code: i32, #[case] reason: &str) {
        assert_eq!(exit_code_for_error(&err), code);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], reason);
        assert_eq!(v["exit_code"], code);
        assert!(v["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[test]
    fn typed_error_survives_context() {
        use eyre::WrapErr;
        let err = Err::<(), _>(eyre::Report::new(GrinderError::Timeout))
            .wrap_err("self-check")
            .unwrap_err();
        assert_eq!(exit_code_for_error(&err), EXIT_HARDWARE);
        assert!(humanize(&err).contains("Scale read timed out"));
    }

    #[test]
    fn deadline_json_carries_details() {
        let v: serde_json::Value =
            serde_json::from_str(&format_error_json(&eyre::Report::new(CliError::GrindDeadline(9))))
                .unwrap();
        assert_eq!(v["details"]["timeout_s"], 9);
    }
}
