//! Command-line behavior of the `queuetrace` binary

use std::path::Path;
use std::process::{Command, Output};

fn queuetrace(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_queuetrace"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to start queuetrace")
}

fn write_config(dir: &Path) -> String {
    let path = dir.join("trace.ini");
    std::fs::write(
        &path,
        "[System]\nQueueBaseName = Queue\nValidQueues = 4\nServer1 = 127.0.0.1\nServer2 = 127.0.0.2\nPort = 34582\n\n\
         [Trace]\nRunningTime = 0.1\nSenderNumber = 2\nReaderNumber = 1\nDistribution = fixed\nWaitTime = 0.005\n",
    )
    .unwrap();
    path.display().to_string()
}

#[test]
fn test_help_exits_successfully() {
    let output = queuetrace(&["help"]);
    assert!(output.status.success());
    let usage = String::from_utf8_lossy(&output.stdout);
    assert!(usage.contains("run"));
    assert!(usage.contains("plan"));
}

#[test]
fn test_missing_arguments_fail_without_running() {
    assert!(!queuetrace(&[]).status.success());

    let output = queuetrace(&["run"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_unreadable_config_fails() {
    let output = queuetrace(&["run", "/nonexistent/trace.ini"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("trace.ini"));
}

#[test]
fn test_plan_prints_server_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = queuetrace(&["plan", &config]);
    assert!(output.status.success());
    let plan = String::from_utf8_lossy(&output.stdout);
    assert!(plan.contains("Iteration 1 of 1: 3 clients"));
    assert!(plan.contains("Alice1"));
    assert!(plan.contains("127.0.0.2:34582"));
}

#[test]
fn test_run_writes_report_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let report = dir.path().join("report.json");
    let metrics = dir.path().join("metrics.prom");

    let output = queuetrace(&[
        "run",
        &config,
        "--report",
        &report.display().to_string(),
        "--metrics-out",
        &metrics.display().to_string(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    let clients = report["iterations"][0]["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 3);
    assert!(clients.iter().all(|client| client["status"] == "completed"));
    assert_eq!(clients[0]["events"]["CONNECT"], 1);

    let metrics = std::fs::read_to_string(&metrics).unwrap();
    assert!(metrics.contains("queuetrace_events_total"));
}
