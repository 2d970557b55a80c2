use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

mod common;

fn cli(home: &Path, workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("usage-monitor").unwrap();
    cmd.current_dir(workdir)
        .env("CLAUDE_HOME", home)
        .env("XDG_CONFIG_HOME", workdir)
        .env("LOG_LEVEL", "ERROR")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_stats_json() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["stats", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"totalEntries\": 4"))
        .stdout(predicate::str::contains("\"totalSessions\": 3"))
        .stdout(predicate::str::contains("2025-01-02"));
}

#[test]
fn test_stats_with_date_filter() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["stats", "--json", "--since", "2025-01-02", "--until", "2025-01-02"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"totalEntries\": 2"));
}

#[test]
fn test_invalid_date_fails() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["stats", "--since", "01/02/2025"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Use YYYY-MM-DD"));
}

#[test]
fn test_entries_limit() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["entries", "--json", "--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"m4\""))
        .stdout(predicate::str::contains("\"m1\"").not());
}

#[test]
fn test_empty_home_reports_no_data() {
    let home = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("No usage data found"));
}

#[test]
fn test_missing_home_is_an_error() {
    let home = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();

    cli(&home.path().join("missing"), workdir.path())
        .args(["stats", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"error\""));
}

#[test]
fn test_session_without_activity() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["session", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"inactive\""));
}

#[test]
fn test_metrics_json() {
    let home = common::setup_test_environment();
    let workdir = tempfile::tempdir().unwrap();

    cli(home.path(), workdir.path())
        .args(["metrics", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("repository.scan"))
        .stdout(predicate::str::contains("circuitBreaker"));
}
