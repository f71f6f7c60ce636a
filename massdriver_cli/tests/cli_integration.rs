use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Fixed calibration: the loop runs 100x slower than requested, so waits stay short.
const VALID: &str = r#"
[timing]
requested_ns = 1000
actual_ns = 100000

[sense]
mode = "pullup"
edge = "falling"

[[stages]]
trigger = 17
sense = 27
kind = "simple"
delay_us = 10
duration_us = 50

[[stages]]
trigger = 22
sense = 23
kind = "double_tap"
first_delay_us = 0
first_pulse_us = 20
second_delay_us = 10
second_pulse_us = 20

[chronograph]
gate_a = 5
gate_b = 6
distance_mm = 50.0
"#;

fn write_config(dir: &tempfile::TempDir, toml: &str) -> PathBuf {
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn massdriver(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("massdriver").unwrap();
    cmd.arg("--config").arg(cfg).env_remove("RUST_LOG");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "self-check ok: 2 stages", "stdout")]
#[case(&["shot", "--speed", "2"], 0, "shot complete: 2 stages", "stdout")]
#[case(&["lcr", "--inductance", "1e-3", "--capacitance", "1e-3", "--resistance", "0.1", "--voltage", "100"], 0, "series LCR", "stdout")]
#[case(&["lcr", "--inductance", "1e-3", "--capacitance", "1e-3", "--resistance", "10", "--voltage", "100"], 1, "not underdamped", "stderr")]
#[case(&["shot", "--speed", "0"], 1, "must be > 0", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, VALID);
    let out = massdriver(&cfg).args(args).output().unwrap();

    assert_eq!(out.status.code(), Some(exit_code), "args: {args:?}");
    let text = if stream == "stdout" {
        String::from_utf8_lossy(&out.stdout).to_string()
    } else {
        String::from_utf8_lossy(&out.stderr).to_string()
    };
    assert!(
        text.to_lowercase().contains(&needle.to_lowercase()),
        "missing {needle:?} in {stream}: {text}"
    );
}

#[test]
fn missing_subcommand_is_usage_error() {
    Command::cargo_bin("massdriver")
        .unwrap()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("nope.toml");
    massdriver(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("read config"));
}

#[test]
fn duplicate_pin_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &VALID.replace("gate_b = 6", "gate_b = 17"));
    massdriver(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already in use"));
}

#[test]
fn bad_curve_csv_header_is_explained() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("curve.csv"), "raw,volts\n0,0.0\n4095,10.0\n").unwrap();
    let toml = format!(
        "{VALID}\n[voltmeter]\nchannels = [{{ adc = 0, curve = \"csv\", path = \"curve.csv\" }}]\n"
    );
    let cfg = write_config(&dir, &toml);
    massdriver(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("code,voltage"));
}

#[test]
fn voltmeter_channels_are_built() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("curve.csv"), "code,voltage\n0,0.0\n2048,5.0\n4095,10.0\n").unwrap();
    let toml = format!(
        "{VALID}\n[voltmeter]\nsamples = 4\nchannels = [\n  {{ adc = 0, curve = \"csv\", path = \"curve.csv\" }},\n  {{ adc = 1, curve = \"linear\", points = [[0, 0.0], [4095, 400.0]] }},\n]\n"
    );
    let cfg = write_config(&dir, &toml);
    massdriver(&cfg)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 voltmeter channels"));
}

#[test]
fn shot_json_reports_every_stage() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, VALID);
    let out = massdriver(&cfg)
        .args(["--json", "--log-level", "error", "shot", "--speed", "2"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let line = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v["status"], "complete");
    let stages = v["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0]["offset_us"].as_f64(), Some(0.0));
    // 100 mm at 2 m/s
    let gap = stages[1]["offset_us"].as_f64().unwrap();
    assert!(gap > 40_000.0 && gap < 80_000.0, "gap {gap}");
    let speed = v["speed_m_s"].as_f64().unwrap();
    assert!(speed > 1.0 && speed < 2.5, "speed {speed}");
}

#[test]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &VALID.replace("distance_mm = 50.0", "distance_mm = 0.0"));
    let out = massdriver(&cfg).args(["--json", "self-check"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    let last = err.lines().last().unwrap();
    let v: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["reason"], "Error");
    assert!(v["message"].as_str().unwrap().contains("distance_mm"));
}

#[test]
fn calibrate_prints_ratio() {
    Command::cargo_bin("massdriver")
        .unwrap()
        .args(["--json", "calibrate", "--target-us", "100", "--reps", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"k\""));
}
