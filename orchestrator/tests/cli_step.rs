//! CLI tests for `orchestrator step`, `intake` and `heartbeat`.
//!
//! Spawns the orchestrator binary against a temp root with a SQLite store and
//! verifies output and exit codes.

use std::process::Command;
use std::time::Duration;

use orchestrator::exit_codes;
use orchestrator::io::config::load_config;
use orchestrator::io::init::{InitOptions, OrchestratorPaths, init_orchestrator};
use orchestrator::io::store::{SqliteStore, Store};
use orchestrator::test_support::project_record;
use serde_json::Value;

fn orchestrator_cmd(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_orchestrator"));
    cmd.arg("--root").arg(root);
    cmd
}

#[test]
fn intake_prints_project_and_step_advances_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_orchestrator(temp.path(), &InitOptions { force: false }).expect("init");

    let output = orchestrator_cmd(temp.path())
        .args([
            "intake",
            "--title",
            "Analytics dashboard",
            "--description",
            "Weekly revenue charts for the sales team",
            "--category",
            "data-ml",
        ])
        .output()
        .expect("orchestrator intake");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let outcome: Value = serde_json::from_slice(&output.stdout).expect("intake json");
    assert_eq!(outcome["next"]["stage"], "planning");
    let project_id = outcome["projectId"].as_str().expect("project id").to_string();

    let output = orchestrator_cmd(temp.path())
        .args(["step", &project_id])
        .output()
        .expect("orchestrator step");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let result: Value = serde_json::from_slice(&output.stdout).expect("step json");
    assert_eq!(result["stage"], "estimated");
    assert_eq!(result["action"], "planning");
}

#[test]
fn idle_step_exits_with_no_action_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_orchestrator(temp.path(), &InitOptions { force: false }).expect("init");
    let config = load_config(&paths.config_path).expect("config");
    {
        let store = SqliteStore::open(&config.store_path(temp.path()), Duration::from_secs(1))
            .expect("open");
        store
            .insert_project(&project_record("p-review", "review"))
            .expect("insert");
    }

    let status = orchestrator_cmd(temp.path())
        .args(["step", "p-review"])
        .status()
        .expect("orchestrator step");
    assert_eq!(status.code(), Some(exit_codes::NO_ACTION));
}

#[test]
fn unknown_project_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_orchestrator(temp.path(), &InitOptions { force: false }).expect("init");

    let output = orchestrator_cmd(temp.path())
        .args(["step", "missing"])
        .output()
        .expect("orchestrator step");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("project not found: missing"));
}

#[test]
fn heartbeat_reports_results() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_orchestrator(temp.path(), &InitOptions { force: false }).expect("init");

    let output = orchestrator_cmd(temp.path())
        .args(["heartbeat", "--limit", "5"])
        .output()
        .expect("orchestrator heartbeat");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["results"], Value::Array(Vec::new()));
}

#[test]
fn validate_rejects_broken_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = OrchestratorPaths::new(temp.path());
    std::fs::create_dir_all(&paths.orchestrator_dir).expect("dir");
    std::fs::write(&paths.config_path, "[runs]\nmax_attempts = 0\n").expect("write");

    let status = orchestrator_cmd(temp.path())
        .arg("validate")
        .status()
        .expect("orchestrator validate");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
