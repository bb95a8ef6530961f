//! End-to-end tests for CLI exit codes.
//!
//! These tests verify that the CLI returns the correct exit codes according to
//! the conventions documented in [`repo_sync::exit_codes`]:
//!
//! - Exit code 0: Success
//! - Exit code 1: A repository failed to sync (or changes are pending for
//!   the `diff` command)
//! - Exit code 2: The run could not start (bad configuration, bad usage)

use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;

const EMPTY_CONFIG: &str = "templates: []\nrepositories: []\n";

/// Exit code 0 is returned for --help.
#[test]
fn test_exit_code_help() {
    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.arg("--help")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("diff"));
}

/// Exit code 0 is returned for --version.
#[test]
fn test_exit_code_version() {
    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.arg("--version").assert().code(0);
}

/// Exit code 0 is returned when there is nothing to synchronize.
#[test]
fn test_exit_code_success_empty_config() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("repo-sync.yaml");
    config_file.write_str(EMPTY_CONFIG).unwrap();

    for command in ["diff", "sync"] {
        let mut cmd = cargo_bin_cmd!("repo-sync");
        cmd.current_dir(temp.path())
            .arg(command)
            .arg("--root")
            .arg(temp.path())
            .assert()
            .code(0);
    }
}

/// Exit code 2 is returned for configuration file not found.
#[test]
fn test_exit_code_error_config_not_found() {
    let temp = assert_fs::TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.current_dir(temp.path())
        .arg("diff")
        .arg("--config")
        .arg("nonexistent.yaml")
        .arg("--root")
        .arg(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration file not found"));
}

/// Exit code 2 is returned for invalid YAML syntax.
#[test]
fn test_exit_code_error_invalid_yaml() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("repo-sync.yaml");
    config_file
        .write_str(
            r#"
templates:
  - name: base
    url: [unclosed
"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.current_dir(temp.path())
        .arg("diff")
        .arg("--root")
        .arg(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load config"))
        .stderr(predicate::str::contains("Configuration parsing error"));
}

/// Exit code 2 is returned when a repository references an unknown template.
#[test]
fn test_exit_code_error_unknown_template() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("repo-sync.yaml");
    config_file
        .write_str(
            r#"
templates:
  - name: base
    url: https://git.example.com/acme/base.git
repositories:
  - name: Service
    url: https://git.example.com/acme/svc.git
    templates: [base, missing]
"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.current_dir(temp.path())
        .arg("sync")
        .arg("--root")
        .arg(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown template 'missing'"))
        .stderr(predicate::str::contains("Known templates: base"));
}

/// Exit code 2 is returned when the repository root does not exist.
#[test]
fn test_exit_code_error_root_not_found() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("repo-sync.yaml").write_str(EMPTY_CONFIG).unwrap();

    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.current_dir(temp.path())
        .arg("sync")
        .arg("--root")
        .arg(temp.path().join("missing"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Repository root not found"));
}

/// Exit code 2 is returned for unknown command-line flags (handled by clap).
#[test]
fn test_exit_code_usage_unknown_flag() {
    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.arg("--unknown-flag-that-does-not-exist")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error:"));
}

/// Exit code 2 is returned for unknown subcommand.
#[test]
fn test_exit_code_usage_unknown_subcommand() {
    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.arg("unknown-subcommand-xyz")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error:"));
}

/// Exit code 2 is returned for invalid argument values.
#[test]
fn test_exit_code_usage_invalid_output() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("repo-sync");

    cmd.arg("sync")
        .arg("--root")
        .arg(temp.path())
        .arg("--output")
        .arg("carrier-pigeon")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown output"));
}
