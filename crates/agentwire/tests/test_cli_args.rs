//! CLI tests for AgentWire

mod common;

use assert_cmd::Command;
use common::TestEnv;
use predicates::prelude::*;

/// Get a command instance with the agentwire binary
fn agentwire() -> Command {
    Command::new(env!("CARGO_BIN_EXE_agentwire"))
}

#[test]
fn test_help_flag() {
    let mut cmd = agentwire();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Real-time agent event streaming"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("replay"));
}

#[test]
fn test_version_flag() {
    let mut cmd = agentwire();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_help() {
    let mut cmd = agentwire();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = agentwire();
    cmd.arg("engage");
    cmd.assert().failure();
}

// ============================================================================
// Init command tests
// ============================================================================

#[test]
fn test_init_creates_config_with_token() {
    let env = TestEnv::default();

    env.command()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("AgentWire initialized"));

    let content = std::fs::read_to_string(env.config_file()).unwrap();
    let config: serde_json::Value = serde_json::from_str(&content).unwrap();
    let token = config["client"]["token"].as_str().unwrap();
    assert_eq!(config["auth"]["tokens"][0], token);
    assert!(env.data_dir.join("chats").is_dir());
}

#[test]
fn test_init_twice_keeps_token() {
    let env = TestEnv::default();

    env.command().arg("init").assert().success();
    let first = std::fs::read_to_string(env.config_file()).unwrap();
    env.command().arg("init").assert().success();
    let second = std::fs::read_to_string(env.config_file()).unwrap();

    assert_eq!(first, second);
}

// ============================================================================
// Serve and chat command tests
// ============================================================================

#[test]
fn test_serve_command_help() {
    let mut cmd = agentwire();
    cmd.args(["serve", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Start the streaming server"))
        .stdout(predicate::str::contains("-v, --verbose"));
}

#[test]
fn test_chat_command_help() {
    let mut cmd = agentwire();
    cmd.args(["chat", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("-c, --chat"))
        .stdout(predicate::str::contains("[default: default]"));
}

#[test]
fn test_chat_without_server_reports_failure_block() {
    let env = TestEnv::default();
    std::fs::create_dir_all(&env.data_dir).unwrap();
    std::fs::write(
        env.config_file(),
        r#"{"client": {"endpoint": "http://127.0.0.1:9"}}"#,
    )
    .unwrap();

    env.command()
        .args(["chat", "-m", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("~/error"))
        .stdout(predicate::str::contains("Failed to process message"));
}

// ============================================================================
// Replay command tests
// ============================================================================

#[test]
fn test_replay_reconstructs_capture() {
    let env = TestEnv::default();
    let capture = concat!(
        "data: {\"type\":\"connected\"}\n\n",
        "data: {\"type\":\"token\",\"token\":\"Hello\"}\n\n",
        "data: {\"type\":\"tool_start\",\"tool\":\"search\",\"input\":{\"q\":\"x\"}}\n\n",
        "data: {\"type\":\"tool_end\",\"tool\":\"search\",\"output\":\"found\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
    );
    let path = env.write("capture.sse", capture).unwrap();

    env.command()
        .arg("replay")
        .arg(&path)
        .args(["--chunk-size", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello-START-"))
        .stdout(predicate::str::contains("~/search"))
        .stdout(predicate::str::contains("found\n--END--"));
}

#[test]
fn test_replay_truncated_capture_fails() {
    let env = TestEnv::default();
    let path = env
        .write("capture.sse", "data: {\"type\":\"connected\"}\n\ndata: {\"ty")
        .unwrap();

    env.command().arg("replay").arg(&path).assert().failure();
}

#[test]
fn test_replay_missing_file_fails() {
    let env = TestEnv::default();

    env.command()
        .args(["replay", "does-not-exist.sse"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
