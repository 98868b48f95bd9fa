use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use assert_cmd::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[scale]
sample_rate_hz = 50

[control]
loop_hz = 50
settle_ms = 100
saving_dwell_ms = 100

[actuator]
ramp_up_per_tick = 0.01
kick_dwell_ms = 20

[presets]
small_dg = 20
large_dg = 25
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn grinder_json(dir: &tempfile::TempDir) -> Command {
    let cfg = write_valid_config(dir);
    let mut cmd = Command::cargo_bin("grinder").unwrap();
    cmd.env_remove("RUST_LOG")
        .env("GRINDER_SIM_RATE", "20")
        .arg("--json")
        .arg("--log-level")
        .arg("warn")
        .arg("--config")
        .arg(cfg)
        .arg("--state-file")
        .arg(dir.path().join("state.toml"));
    cmd
}

/// A successful grind prints exactly one snapshot object on stdout.
#[rstest]
fn grind_snapshot_schema() {
    let dir = tempdir().unwrap();
    let out = grinder_json(&dir)
        .args(["grind", "--preset", "large", "--timeout-s", "20"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{out:?}");

    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "stdout: {stdout}");
    let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();

    for key in [
        "state",
        "selected_preset",
        "remaining_dg",
        "current_weight_g",
        "scale_factor",
        "stall_threshold_g",
        "small_runs",
        "large_runs",
        "total_weight_g",
        "small_dg",
        "large_dg",
        "motor_output",
    ] {
        assert!(v.get(key).is_some(), "missing {key} in {v}");
    }
    assert_eq!(v["state"], "IDLE");
    assert_eq!(v["selected_preset"], "large");
    assert_eq!(v["large_runs"], 1);
    assert_eq!(v["small_runs"], 0);
    assert!(v["total_weight_g"].as_f64().unwrap() >= 2.5);
}

/// Persisted state round-trips through `state --json`.
#[rstest]
fn state_json_schema() {
    let dir = tempdir().unwrap();
    let out = grinder_json(&dir).arg("state").output().unwrap();
    assert!(out.status.success(), "{out:?}");
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["small_dg"], 20);
    assert_eq!(v["large_dg"], 25);
    assert_eq!(v["small_runs"], 0);
    assert!(v["scale_factor"].as_f64().is_some());
}

/// Errors in JSON mode are one object on stderr with a stable reason.
#[rstest]
#[case("[scale]\nsample_rate_hz = 0\n", "Config", 3)]
#[case("[stall]\npolicy = \"panic\"\n", "Config", 3)]
fn error_json_schema(#[case] body: &str, #[case] reason: &str, #[case] code: i64) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, body).unwrap();
    let out = Command::cargo_bin("grinder")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg("--json")
        .arg("--config")
        .arg(&cfg)
        .arg("state")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));

    let stderr = String::from_utf8(out.stderr).unwrap();
    let last = stderr.lines().last().unwrap();
    let v: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["reason"], reason);
    assert_eq!(v["exit_code"], code);
    assert!(v["message"].as_str().unwrap().contains("What happened"));
}

/// `run --json` emits one `{topic, payload}` object per changed topic.
#[rstest]
fn run_topic_lines_schema() {
    let dir = tempdir().unwrap();
    let out = grinder_json(&dir)
        .args(["run", "--duration-s", "1"])
        .write_stdin("")
        .output()
        .unwrap();
    assert!(out.status.success(), "{out:?}");

    let stdout = String::from_utf8(out.stdout).unwrap();
    let mut topics = Vec::new();
    for line in stdout.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(v["payload"].is_string(), "{v}");
        topics.push(v["topic"].as_str().unwrap().to_string());
    }
    for expected in ["current_weight", "current_state", "preset_left", "scale_factor"] {
        assert!(topics.iter().any(|t| t == expected), "no {expected} in {topics:?}");
    }
}
