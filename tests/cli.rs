use assert_cmd::prelude::*;
use serde_json::Value;
use std::path::Path;
use std::process::Command;

fn routewatch(config: &Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("routewatch");
    let mut cmd = Command::new(bin);
    cmd.arg("--config").arg(config);
    // Nothing listens here; commands that reach the network must fail fast.
    cmd.env("ROUTEWATCH_API_URL", "http://127.0.0.1:9");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("utf8 output");
    serde_json::from_str(stdout.trim()).expect("valid json")
}

#[test]
fn help_lists_subcommands() {
    let bin = assert_cmd::cargo::cargo_bin!("routewatch");
    let assert = Command::new(bin).arg("--help").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for command in ["run", "compare", "nearest", "meta", "config", "info", "metrics"] {
        assert!(stdout.contains(command), "missing {command} in help:\n{stdout}");
    }
}

#[test]
fn config_show_uses_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routewatch.yaml");
    std::fs::write(
        &path,
        "link:\n  api_url: http://10.1.2.3:8000\n  retry_base_ms: 750\nrun:\n  algorithm: astar\n",
    )
    .unwrap();

    let assert = routewatch(&path)
        .args(["--output", "json", "config", "show"])
        .assert()
        .success();
    let value = stdout_json(assert.get_output());
    assert_eq!(value["link"]["api_url"].as_str(), Some("http://10.1.2.3:8000"));
    assert_eq!(value["link"]["retry_base_ms"].as_u64(), Some(750));
    assert_eq!(value["link"]["retry_max_ms"].as_u64(), Some(10_000));
    assert_eq!(value["run"]["algorithm"].as_str(), Some("astar"));
}

#[test]
fn config_set_then_get() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("routewatch.yaml");

    routewatch(&path)
        .args(["config", "set", "link.send_timeout_ms", "1500"])
        .assert()
        .success();
    assert!(path.exists());

    let assert = routewatch(&path)
        .args(["config", "get", "link.send_timeout_ms"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(stdout.trim(), "1500");

    routewatch(&path)
        .args(["config", "get", "link.no_such_key"])
        .assert()
        .failure();
}

#[test]
fn info_reports_link_settings_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    let assert = routewatch(&path)
        .args(["--output", "json", "info"])
        .assert()
        .success();
    let value = stdout_json(assert.get_output());
    assert_eq!(value["config_present"].as_bool(), Some(false));
    assert_eq!(
        value["link"]["stream_url"].as_str(),
        Some("ws://127.0.0.1:9/ws/run")
    );
    assert_eq!(value["link"]["retry_base_ms"].as_u64(), Some(2_000));
    assert_eq!(value["link"]["clean_reconnect_ms"].as_u64(), Some(500));
    assert_eq!(value["metrics"]["connect_attempts"].as_u64(), Some(0));
}

#[test]
fn run_rejects_bad_parameters_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    let assert = routewatch(&path)
        .args(["run", "--origin", "1", "--destination", "2", "--speed", "0"])
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("invalid stream parameters"), "stderr: {stderr}");
}

#[test]
fn run_requires_both_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    routewatch(&path)
        .args(["run", "--origin", "1"])
        .assert()
        .failure();
}

#[test]
fn metrics_prints_prometheus_exposition() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    let assert = routewatch(&path).arg("metrics").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(
        stdout.contains("# TYPE routewatch_link_connect_attempts_total counter"),
        "stdout: {stdout}"
    );
    assert!(stdout.contains("routewatch_link_connect_attempts_total 0"));
}
