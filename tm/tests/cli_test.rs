//! CLI tests for the `tm` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `tm` isolated from the user's config and data directories
fn tm(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tm").expect("binary builds");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_config_prints_defaults() {
    let home = TempDir::new().unwrap();
    tm(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-concurrent: 5"))
        .stdout(predicate::str::contains("default-timeout-ms: 90000"))
        .stdout(predicate::str::contains("fallback-response: No response available"));
}

#[test]
fn test_config_reads_explicit_file() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("custom.yml");
    fs::write(&path, "scheduler:\n  max-concurrent: 9\n").unwrap();

    tm(&home)
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-concurrent: 9"));
}

#[test]
fn test_local_config_file_is_picked_up() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("taskmesh.yml"), "correlator:\n  default-timeout-ms: 1234\n").unwrap();

    tm(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("default-timeout-ms: 1234"));
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("bad.yml");
    fs::write(&path, "scheduler:\n  max-concurrent: 0\n").unwrap();

    tm(&home)
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_score_ranks_configured_workers() {
    let home = TempDir::new().unwrap();
    tm(&home)
        .args(["score", "--capability", "transfer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vault-1"))
        .stdout(predicate::str::contains("echo-1").not());
}

#[test]
fn test_score_without_candidates() {
    let home = TempDir::new().unwrap();
    tm(&home)
        .args(["score", "--capability", "teleport"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No candidates for 'teleport'"));
}

#[test]
fn test_demo_runs_requests_end_to_end() {
    let home = TempDir::new().unwrap();
    tm(&home)
        .args(["demo", "--timeout-ms", "5000", "echo hi", "swap my tokens"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Attached 3 worker(s)"))
        .stdout(predicate::str::contains(r#""response":"hi""#))
        .stdout(predicate::str::contains("No capable worker for category 'swap'"));
}

#[test]
fn test_journal_requires_a_path() {
    let home = TempDir::new().unwrap();
    tm(&home)
        .arg("journal")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bus.journal-path is not set"));
}
