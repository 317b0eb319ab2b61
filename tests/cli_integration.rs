//! Integration tests for the fixloop CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Nothing listens on the discard port, so every request is refused.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/v1";

/// Get a Command for the fixloop binary
fn fixloop(workspace: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("fixloop"));
    cmd.env("NO_COLOR", "1")
        .env_remove("FIXLOOP_BASE_URL")
        .arg("--workspace")
        .arg(workspace);
    cmd
}

fn write_script(temp: &TempDir, body: &str) -> PathBuf {
    let app = temp.path().join("app");
    fs::create_dir_all(&app).unwrap();
    fs::write(app.join("data.txt"), "sibling\n").unwrap();
    let script = app.join("job.sh");
    fs::write(&script, body).unwrap();
    script
}

fn failing_run(temp: &TempDir, script: &Path) -> assert_cmd::assert::Assert {
    fixloop(temp.path())
        .arg("run")
        .arg(script)
        .arg("--interpreter")
        .arg("sh")
        .arg("--timeout")
        .arg("10")
        .arg("--base-url")
        .arg(DEAD_ENDPOINT)
        .arg("--no-promote")
        .assert()
}

#[test]
fn test_help() {
    Command::new(cargo::cargo_bin!("fixloop"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Repair failing scripts"));
}

#[test]
fn test_version() {
    Command::new(cargo::cargo_bin!("fixloop"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_run_missing_script_exits_with_code() {
    let temp = TempDir::new().unwrap();

    fixloop(temp.path())
        .arg("run")
        .arg(temp.path().join("nope.py"))
        .assert()
        .code(6)
        .stderr(predicate::str::contains("Script not found"));
}

#[test]
fn test_run_successful_script_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "echo hello\nexit 0\n");

    fixloop(temp.path())
        .arg("run")
        .arg(&script)
        .arg("--interpreter")
        .arg("sh")
        .arg("--base-url")
        .arg(DEAD_ENDPOINT)
        .assert()
        .success()
        .stdout(predicate::str::contains("Script executed successfully."));

    let project = temp.path().join("Projects/job");
    assert!(!project.join("jobBACKUPS").exists());
    assert!(!project.join("BugFix1").exists());
    assert!(!temp.path().join("error.txt").exists());
}

#[test]
fn test_run_backs_up_before_unreachable_model() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "echo 'boom' >&2\nexit 3\n");

    failing_run(&temp, &script).code(4);

    let project = temp.path().join("Projects/job");
    let snapshot = project.join("jobBACKUPS/1-1");
    assert_eq!(
        fs::read(snapshot.join("jobCURRCOPY.sh")).unwrap(),
        fs::read(&script).unwrap()
    );
    assert!(snapshot.join("jobCURRENV/data.txt").is_file());
    assert!(snapshot.join("manifest.json").is_file());

    let error = fs::read_to_string(project.join("BugFix1/joberror.txt")).unwrap();
    assert!(error.starts_with("Error Output:\nboom"));
    assert_eq!(
        fs::read_to_string(temp.path().join("error.txt")).unwrap(),
        error
    );
}

#[test]
fn test_second_run_uses_next_index() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 1\n");

    failing_run(&temp, &script).code(4);
    failing_run(&temp, &script).code(4);

    let backups = temp.path().join("Projects/job/jobBACKUPS");
    assert!(backups.join("1-1").is_dir());
    assert!(backups.join("2-2").is_dir());
}

#[test]
fn test_history_empty_project() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 0\n");

    fixloop(temp.path())
        .arg("history")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots yet"));
}

#[test]
fn test_history_json_lists_snapshots() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 1\n");
    failing_run(&temp, &script).code(4);

    let output = fixloop(temp.path())
        .arg("history")
        .arg(&script)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["project"], "job");
    assert_eq!(value["snapshots"][0]["counter"], 1);
    assert_eq!(value["bug_fixes"], serde_json::json!([1]));
    assert_eq!(value["next_counter"], 2);
}

#[test]
fn test_restore_requires_force() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 0\n");

    fixloop(temp.path())
        .arg("restore")
        .arg(&script)
        .arg("--snapshot")
        .arg("1")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_restore_missing_snapshot_fails() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 0\n");

    fixloop(temp.path())
        .arg("restore")
        .arg(&script)
        .arg("--snapshot")
        .arg("7")
        .arg("--force")
        .assert()
        .failure();

    assert_eq!(fs::read_to_string(&script).unwrap(), "exit 0\n");
}

#[test]
fn test_restore_brings_back_snapshot() {
    let temp = TempDir::new().unwrap();
    let script = write_script(&temp, "exit 1\n");
    failing_run(&temp, &script).code(4);

    fs::write(&script, "echo edited by hand\n").unwrap();

    fixloop(temp.path())
        .arg("restore")
        .arg(&script)
        .arg("--snapshot")
        .arg("1")
        .arg("--force")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored snapshot 1"));

    assert_eq!(fs::read_to_string(&script).unwrap(), "exit 1\n");
    let safety = temp.path().join("Projects/job/jobBACKUPS/2-2/jobCURRCOPY.sh");
    assert_eq!(fs::read_to_string(safety).unwrap(), "echo edited by hand\n");
}
