#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn caprims(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_caprims"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("CAPRIMS_TIMEOUT")
        .output()
        .expect("caprims should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

#[test]
fn get_reads_demo_record() {
    let output = caprims(&["--format", "json", "get", "catest"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["pv"], "catest");
    assert_eq!(lines[0]["dbr_type"], "DBR_DOUBLE");
    assert_eq!(lines[0]["value"], 1.0);
}

#[test]
fn get_with_record_type_includes_metadata() {
    let output = caprims(&["--format", "json", "get", "catest", "--type", "ctrl_double"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["record"]["units"], "mm");
    assert_eq!(lines[0]["record"]["precision"], 4);
}

#[test]
fn put_writes_and_reads_back() {
    let output = caprims(&["--format", "json", "put", "catest", "12.5"]);
    assert!(output.status.success());
    assert_eq!(json_lines(&output)[0]["value"], 12.5);

    let output = caprims(&["--format", "raw", "put", "cawavel", "1", "2", "3"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("1 2 3 0"));
}

#[test]
fn put_state_name_to_enum() {
    let output = caprims(&["--format", "raw", "put", "cabo", "Busy"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1");
}

#[test]
fn put_unconvertible_value_returns_60() {
    let output = caprims(&["put", "calong", "1.5"]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("calong"));
}

#[test]
fn put_too_many_values_with_reject_returns_60() {
    let output = caprims(&["put", "castr", "a", "b", "--reject-long"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn unknown_channel_times_out_with_124() {
    let output = caprims(&["--timeout", "200ms", "get", "nosuchpv"]);
    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nosuchpv"));
}

#[test]
fn timeout_env_fallback_is_validated() {
    let output = Command::new(env!("CARGO_BIN_EXE_caprims"))
        .args(["get", "catest"])
        .env("CAPRIMS_TIMEOUT", "soon")
        .output()
        .expect("caprims should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn monitor_stops_after_count() {
    let output = caprims(&["--format", "json", "monitor", "catest", "--count", "1"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["dbr_type"], "DBR_TIME_DOUBLE");
    assert!(lines[0]["record"]["stamp"].is_object());
}

#[test]
fn monitor_stops_after_duration() {
    let output = caprims(&["--format", "raw", "monitor", "catest", "--duration", "200ms"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1");
}

#[test]
fn info_reports_native_shape() {
    let output = caprims(&["--format", "json", "info", "cawave"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["state"], "connected");
    assert_eq!(lines[0]["field_type"], "DBF_DOUBLE");
    assert_eq!(lines[0]["element_count"], 20);
    assert_eq!(lines[0]["access"]["write"], true);
}

#[test]
fn types_lists_the_catalog() {
    let output = caprims(&["--format", "json", "types"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 39);
    assert_eq!(lines[34]["dbr_type"], "DBR_CTRL_DOUBLE");

    let output = caprims(&["--format", "json", "types", "--kind", "double"]);
    assert_eq!(json_lines(&output).len(), 5);
}

#[test]
fn size_prints_record_bytes() {
    let output = caprims(&["--format", "raw", "size", "DBR_TIME_DOUBLE"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "24");

    let output = caprims(&["--format", "raw", "size", "double", "-n", "10"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "80");

    let output = caprims(&["size", "DBR_NOPE"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn status_describes_codes() {
    let output = caprims(&["--format", "json", "status", "80", "339"]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["name"], "ECA_TIMEOUT");
    assert_eq!(lines[0]["success"], false);
    assert_eq!(lines[1]["name"], "ECA_IODONE");
    assert_eq!(lines[1]["success"], true);
}

#[cfg(not(feature = "libca"))]
#[test]
fn libca_backend_without_feature_returns_64() {
    let output = caprims(&["--backend", "libca", "get", "catest"]);
    assert_eq!(output.status.code(), Some(64));
}
