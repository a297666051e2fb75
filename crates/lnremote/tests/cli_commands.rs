#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn lnremote(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lnremote"))
        .env_remove("LNREMOTE_CONNECTION")
        .env_remove("LNREMOTE_SERIAL")
        .env_remove("LNREMOTE_DEVICE")
        .env_remove("LNREMOTE_IP")
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("lnremote should run")
}

fn dummy(args: &[&str]) -> Output {
    let mut all = vec!["--connection", "dummy"];
    all.extend_from_slice(args);
    lnremote(&all)
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .last()
        .unwrap_or_else(|| panic!("no output; stderr: {}", String::from_utf8_lossy(&output.stderr)));
    serde_json::from_str(line).expect("stdout should be json")
}

#[test]
fn version_prints_package_version() {
    let output = lnremote(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("lnremote {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn status_reports_every_axis() {
    let output = dummy(&["status"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json = stdout_json(&output);
    assert_eq!(json["kind"], "status");
    assert_eq!(json["endpoint"], "dummy");
    let axes = json["axes"].as_array().expect("axes array");
    assert_eq!(axes.len(), 3);
    assert_eq!(axes[0]["axis"], "X");
    assert_eq!(axes[0]["position_um"], 0.0);
    assert_eq!(axes[2]["stale"], false);
}

#[test]
fn approach_completes_against_dummy_unit() {
    let output = dummy(&["approach", "-50", "--surface", "0"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json = stdout_json(&output);
    assert_eq!(json["kind"], "maneuver");
    assert_eq!(json["state"], "completed");
    let depth = json["axes"][0]["position_um"].as_f64().expect("depth");
    assert!((depth + 50.0).abs() <= 0.5, "depth {depth}");
}

#[test]
fn move_away_inside_sample_needs_confirmation() {
    // Dummy unit starts at depth 0, below a surface at 100.
    let output = dummy(&["move-away", "--surface", "100"]);
    assert_eq!(output.status.code(), Some(30));

    let json = stdout_json(&output);
    assert_eq!(json["state"], "aborted");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("inside sample"), "stderr: {stderr}");
}

#[test]
fn return_leaves_depth_axis_alone() {
    let output = dummy(&["return"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["state"], "completed");
}

#[test]
fn velocity_stage_out_of_range_is_usage_error() {
    let output = dummy(&["velocity", "x", "16"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn approach_beyond_depth_limit_is_data_invalid() {
    let output = dummy(&["approach", "1000000"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn monitor_stops_after_count() {
    let output = dummy(&["monitor", "--count", "4", "--interval", "100ms"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("report line should be json"))
        .collect();
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|line| line["kind"] == "position"));
}

#[test]
fn doctor_checks_dummy_unit() {
    let output = dummy(&["doctor"]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["overall"], "pass");
    let unit = json["checks"]
        .as_array()
        .expect("checks")
        .iter()
        .find(|check| check["name"] == "control_unit")
        .expect("control unit check");
    assert_eq!(unit["status"], "pass");
}

#[test]
fn tcp_without_host_is_usage_error() {
    let output = lnremote(&["--connection", "tcp", "status"]);
    assert_eq!(output.status.code(), Some(64));
}

#[cfg(unix)]
#[test]
fn refused_tcp_connection_is_transport_error() {
    let output = lnremote(&[
        "--connection",
        "tcp",
        "--host",
        "127.0.0.1",
        "--port",
        "1",
        "status",
    ]);
    assert_eq!(output.status.code(), Some(3));
}
