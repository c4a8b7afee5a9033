mod common;

use assert_fs::prelude::*;
use predicates::prelude::*;
use std::process::{Command, Output};

use common::TestWorkspace;

/// Integration tests for gitpulse CLI commands
/// These tests run the actual binary against temporary workspaces

fn gitpulse(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gitpulse"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_cli_help() {
    let output = gitpulse(&["--help"]);

    assert!(output.status.success());
    let stdout = stdout(&output);

    for command in ["init", "sync", "list", "daemon", "doctor"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = gitpulse(&["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("gitpulse"));
}

#[test]
fn test_daemon_help_lists_cancel() {
    let output = gitpulse(&["daemon", "--help"]);

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("cancel"));
    assert!(stdout.contains("start"));
}

#[test]
fn test_list_finds_repositories_one_level_deep() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_empty_config();
    workspace.make_repo("alpha");
    workspace.make_repo("beta");
    workspace.make_dir("docs");
    workspace.make_repo("docs/deep");

    let root = workspace.root.path().to_string_lossy().to_string();
    let output = gitpulse(&["--config", config.to_str().unwrap(), "--root", &root, "list"]);

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Repositories (2)"));
    assert!(stdout.contains("alpha"));
    assert!(stdout.contains("beta"));
    assert!(!stdout.contains("deep"));
}

#[test]
fn test_sync_without_roots() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_empty_config();

    let output = gitpulse(&["--config", config.to_str().unwrap(), "sync"]);

    assert!(output.status.success());
    assert!(predicate::str::contains("No Git repositories found").eval(&stdout(&output)));
}

#[test]
fn test_sync_json_without_repositories() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_empty_config();
    let empty = workspace.make_dir("empty");

    let output = gitpulse(&[
        "--config",
        config.to_str().unwrap(),
        "--root",
        empty.to_str().unwrap(),
        "sync",
        "--json",
    ]);

    assert!(output.status.success());
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("sync --json prints a JSON summary");
    assert_eq!(summary["total_repositories"], 0);
    assert_eq!(summary["status"]["status"], "no_repositories");
}

#[test]
fn test_init_writes_config() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("gitpulse").child("config.yml");
    let root = temp.child("projects");
    root.create_dir_all().unwrap();

    let output = gitpulse(&[
        "init",
        "--config",
        config.path().to_str().unwrap(),
        "--continuous",
        root.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    config.assert(predicate::path::exists());
    config.assert(predicate::str::contains(root.path().to_str().unwrap()));
    config.assert(predicate::str::contains("enabled: true"));

    // Refuses to overwrite without --force
    let again = gitpulse(&[
        "init",
        "--config",
        config.path().to_str().unwrap(),
        root.path().to_str().unwrap(),
    ]);
    assert!(!again.status.success());
}

#[test]
fn test_daemon_status_when_not_running() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("gitpulse.yml");
    config
        .write_str(&format!(
            "daemon:\n  pid_file: \"{}\"\n  log_file: \"{}\"\n",
            temp.child("gitpulse.pid").path().display(),
            temp.child("gitpulse.log").path().display()
        ))
        .unwrap();

    let output = gitpulse(&["--config", config.path().to_str().unwrap(), "daemon", "status"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Not running"));

    let cancel = gitpulse(&["--config", config.path().to_str().unwrap(), "daemon", "cancel"]);
    assert!(cancel.status.success());
    assert!(stdout(&cancel).contains("No daemon appears to be running"));
}

#[test]
fn test_invalid_config_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("gitpulse.yml");
    config
        .write_str("continuous_pull:\n  enabled: true\n  interval: 0\n")
        .unwrap();

    let output = gitpulse(&["--config", config.path().to_str().unwrap(), "list"]);
    assert!(!output.status.success());
}
