use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn lossy_run_converges() {
    let output = cargo_bin_cmd!("chain-sim")
        .args(["--format", "json", "run", "--edges", "60", "--rpc-failure-rate", "0.4"])
        .args(["--seed", "11"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["converged"], Value::Bool(true));
    assert_eq!(json["staged_left"], 0);
    assert_eq!(json["inserted"], 60);
    assert_eq!(json["edge_keys"], 120);
    assert!(json["deferred"].as_u64().unwrap() > 0);
}

#[test]
fn text_report_lists_result() {
    let output = cargo_bin_cmd!("chain-sim")
        .args(["run", "--edges", "10", "--rpc-failure-rate", "0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("converged=true"), "{text}");
}

#[test]
fn config_file_is_honoured() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("chain.toml");
    fs::write(&path, "retry_limit = 0\nscan_batch_limit = 4\n").expect("write config");
    cargo_bin_cmd!("chain-sim")
        .arg("--config")
        .arg(&path)
        .args(["run", "--edges", "20", "--rpc-failure-rate", "0.5"])
        .assert()
        .success();
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("chain.toml");
    fs::write(&path, "rpc_timeout_ms = 0\n").expect("write config");
    cargo_bin_cmd!("chain-sim")
        .arg("--config")
        .arg(&path)
        .args(["run", "--edges", "1"])
        .assert()
        .failure();
}

#[test]
fn out_of_range_failure_rate_is_rejected() {
    cargo_bin_cmd!("chain-sim")
        .args(["run", "--rpc-failure-rate", "1.5"])
        .assert()
        .failure();
}
