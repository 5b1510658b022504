//! CLI smoke tests — commands that work without API keys.
//!
//! These tests run the compiled binary against throwaway config files and
//! verify exit codes and output. No network access required.

use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

/// Helper: run clawcore with given args and return (exit_code, stdout, stderr).
fn run_cli(args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_clawcore");
    let output = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to execute clawcore binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("config.json");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let (code, stdout, _stderr) = run_cli(&[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("clawcore"));
}

#[test]
fn cli_version_command() {
    let (code, stdout, _stderr) = run_cli(&["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("clawcore"));
    assert!(stdout.contains('.'));
}

#[test]
fn cli_invalid_command() {
    let (code, _stdout, stderr) = run_cli(&["frobnicate"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("frobnicate"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_missing_file() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let (code, stdout, _stderr) =
        run_cli(&["--config", &missing.to_string_lossy(), "config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No config file found"));
}

#[test]
fn cli_config_check_reports_problems() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"{"agnet": {}, "router": {"queue_capacity": 0}}"#,
    );
    let (code, stdout, _stderr) = run_cli(&["--config", &path, "config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("agnet"), "stdout: {}", stdout);
    assert!(stdout.contains("router.queue_capacity"), "stdout: {}", stdout);
    assert!(stdout.contains("error(s)"));
}

#[test]
fn cli_config_check_clean() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), r#"{"agent": {"max_iterations": 4}}"#);
    let (code, stdout, _stderr) = run_cli(&["--config", &path, "config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Configuration looks good!"), "stdout: {}", stdout);
}

// ============================================================================
// Providers & Agent
// ============================================================================

#[test]
fn cli_providers_lists_entries() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"{"providers": {
            "entries": [{"id": "local", "kind": "openai_compatible", "model": "llama3",
                         "api_base": "http://127.0.0.1:9/v1"}],
            "defaults": {"chat": "local"}
        }}"#,
    );
    let (code, stdout, _stderr) = run_cli(&["--config", &path, "providers"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("local"));
    assert!(stdout.contains("llama3"));
    assert!(stdout.contains("Role defaults:"));
}

#[test]
fn cli_agent_without_providers_fails() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), "{}");
    let (code, _stdout, stderr) = run_cli(&["--config", &path, "agent", "-m", "hello"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("No enabled providers"), "stderr: {}", stderr);
}

#[test]
fn cli_agent_help() {
    let (code, stdout, _stderr) = run_cli(&["agent", "--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("--message"));
}
