//! Tests for the hindsight command surface

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let base_dir = temp_dir.path().to_string_lossy().to_string();
    (temp_dir, base_dir)
}

fn hindsight(base_dir: &str) -> Command {
    let mut cmd = Command::cargo_bin("hindsight").unwrap();
    cmd.env_remove("HINDSIGHT_DIR")
        .env_remove("RUST_LOG")
        .arg("--base-dir")
        .arg(base_dir);
    cmd
}

fn record_failure(base_dir: &str, work_item: &str, criterion: &str) {
    hindsight(base_dir)
        .args(["failure", "--work-item", work_item, "--phase", "verify"])
        .args(["--criterion", criterion])
        .assert()
        .success();
}

fn write_record(dir: &Path, json: &str) -> String {
    let path = dir.join("execution.json");
    std::fs::write(&path, json).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_check_on_empty_store() {
    let (_temp, base_dir) = setup_test_env();

    let output = hindsight(&base_dir)
        .args(["check", "anything", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["currentStreak"], 0);
    assert_eq!(report["recentSuccessRate"], 0.0);
    assert_eq!(report["suggestedEffort"], "standard");
    assert_eq!(report["relevantLearnings"].as_array().unwrap().len(), 0);
}

#[test]
fn test_check_narrative() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .args(["check", "refactor the storage layer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Suggested effort: thorough"))
        .stdout(predicate::str::contains("No past learnings yet."));
}

#[test]
fn test_check_succeeds_with_broken_config() {
    let (temp, base_dir) = setup_test_env();
    std::fs::write(temp.path().join("config.toml"), "scoring = [not toml").unwrap();

    hindsight(&base_dir)
        .args(["check", "anything"])
        .assert()
        .success();
}

#[test]
fn test_rating_is_clamped() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .args(["rating", "--work-item", "task-1", "--score", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded rating 5 for task-1"));

    hindsight(&base_dir)
        .args(["rating", "--work-item", "task-2", "--score", "-3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded rating 1 for task-2"));
}

#[test]
fn test_consecutive_good_ratings_build_streak() {
    let (_temp, base_dir) = setup_test_env();

    for work_item in ["task-1", "task-2"] {
        hindsight(&base_dir)
            .args(["rating", "--work-item", work_item, "--score", "4"])
            .assert()
            .success();
    }

    let output = hindsight(&base_dir)
        .args(["stats", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(summary["streak"]["current"], 2);
    assert_eq!(summary["stats"]["avgRating"], 4.0);
    assert_eq!(summary["stats"]["ratingCount"], 2);
}

#[test]
fn test_failure_requires_criterion() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .args(["failure", "--work-item", "task-1"])
        .assert()
        .failure();

    hindsight(&base_dir)
        .args(["failure", "--work-item", "task-1", "--criterion", "  "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("criterion"));
}

#[test]
fn test_loopback_and_signals_listing() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .args(["loopback", "--work-item", "task-1", "--from", "verify", "--to", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verify -> build"));

    hindsight(&base_dir)
        .args(["signals", "loopbacks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fromPhase\":\"verify\""));

    hindsight(&base_dir)
        .args(["signals", "failures"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No records in failures.log"));
}

#[test]
fn test_signals_limit_shows_newest_first() {
    let (_temp, base_dir) = setup_test_env();

    for work_item in ["task-1", "task-2", "task-3"] {
        record_failure(&base_dir, work_item, "tests pass");
    }

    let output = hindsight(&base_dir)
        .args(["signals", "failures", "--limit", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("task-3"));
    assert!(lines[1].contains("task-2"));
}

#[test]
fn test_analyze_detects_repeated_failure_once() {
    let (_temp, base_dir) = setup_test_env();

    record_failure(&base_dir, "task-1", "tests pass");
    record_failure(&base_dir, "task-2", "Tests pass");

    hindsight(&base_dir)
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("Detected 1 new pattern(s)"))
        .stdout(predicate::str::contains("tests pass"));

    hindsight(&base_dir)
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("No new patterns detected"));
}

#[test]
fn test_complete_updates_stats() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .args(["complete", "--iterations", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(1/1 tasks succeeded)"));

    hindsight(&base_dir)
        .args(["complete", "--failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(1/2 tasks succeeded)"));
}

#[test]
fn test_capture_without_record_fails() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .arg("capture")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No execution record found"));
}

#[test]
fn test_capture_empty_record_fails() {
    let (temp, base_dir) = setup_test_env();
    let file = write_record(temp.path(), r#"{"request": "nothing", "rows": []}"#);

    hindsight(&base_dir)
        .args(["capture", "--file", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no rows"));

    assert!(!temp.path().join("learning").exists());
}

#[test]
fn test_capture_writes_learnings() {
    let (temp, base_dir) = setup_test_env();
    let file = write_record(
        temp.path(),
        r#"{
            "request": "Add export endpoint",
            "effort": "STANDARD",
            "iterations": 1,
            "rows": [
                {"criterion": "endpoint returns csv", "status": "done", "capability": "api.http"},
                {"criterion": "auth enforced", "status": "done", "capability": "api.http"},
                {"criterion": "docs updated", "status": "blocked", "blockedReason": "no access"}
            ]
        }"#,
    );

    hindsight(&base_dir)
        .args(["capture", "--file", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("Request: Add export endpoint"))
        .stdout(predicate::str::contains("Capability api.http"))
        .stdout(predicate::str::contains("Blocked: docs updated"));

    assert!(temp.path().join("learning").join("CAPABILITY").is_dir());
    assert!(temp.path().join("learning").join("SESSIONS").is_dir());
}

#[test]
fn test_report_on_empty_store() {
    let (_temp, base_dir) = setup_test_env();

    hindsight(&base_dir)
        .arg("report")
        .assert()
        .success()
        .stdout(predicate::str::contains("No patterns detected yet."));
}
