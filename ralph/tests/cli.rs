//! CLI tests: spawn the ralph binary and check exit codes and key output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::Utc;
use ralph::exit_codes;
use ralph::io::item_store::write_item_set;
use ralph::io::paths::RalphPaths;
use ralph::io::run_state::{NewRun, RunState, write_run_state};
use ralph::test_support::{item, item_set};

fn ralph(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ralph"))
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn ralph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_run(root: &Path) {
    let paths = RalphPaths::new(root);
    let set = item_set(vec![item(1, 1, false), item(2, 2, false)]);
    write_item_set(&root.join("prd.json"), &set).expect("write prd");
    let state = RunState::new(
        NewRun {
            branch: "ralph/demo-20250101-0000".to_string(),
            base_branch: "main".to_string(),
            prd_path: PathBuf::from("prd.json"),
            agent: "claude".to_string(),
            model: None,
            auto_push: false,
            watchdog_timeout: 600,
        },
        Utc::now(),
    );
    write_run_state(&paths.state_path, &state).expect("write state");
}

#[test]
fn status_without_run_exits_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = ralph(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(stdout(&out).contains("No active run"));
}

#[test]
fn status_with_run_reports_progress() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_run(temp.path());
    let out = ralph(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = stdout(&out);
    assert!(text.contains("Progress:  0/2"), "{text}");
    assert!(text.contains("Next:      item 1: Item 1"), "{text}");
}

#[test]
fn resume_without_run_exits_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = ralph(temp.path(), &["resume"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&out).contains("no ralph run found"));
}

#[test]
fn start_with_invalid_prd_exits_one_and_writes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("prd.json"), "{\"goal\": \"g\"}").expect("write");
    let out = ralph(temp.path(), &["start", "prd.json"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(!temp.path().join(".ralph").exists());
}

#[test]
fn start_with_active_run_exits_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_run(temp.path());
    let out = ralph(temp.path(), &["start", "prd.json", "--agent", "codex"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn reset_item_without_checkpoint_exits_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_run(temp.path());
    let out = ralph(temp.path(), &["reset-item", "1"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&out).contains("item 1 has no checkpoint"));
}

#[test]
fn rollback_with_nothing_to_undo_exits_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_run(temp.path());
    let out = ralph(temp.path(), &["rollback"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(stdout(&out).contains("No checkpoints to roll back"));
}

#[test]
fn dry_run_changes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let set = item_set(vec![item(2, 1, false), item(1, 1, true)]);
    write_item_set(&temp.path().join("prd.json"), &set).expect("write prd");
    let out = ralph(temp.path(), &["dry-run", "prd.json"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = stdout(&out);
    assert!(text.contains("Would create: ralph/demo-"), "{text}");
    assert!(text.contains("1 of 2 item(s) remaining"), "{text}");
    assert!(!temp.path().join(".ralph").exists());
}

#[test]
fn log_and_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = ralph(temp.path(), &["log"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));

    write_run(temp.path());
    let paths = RalphPaths::new(temp.path());
    std::fs::write(&paths.log_path, "a\nb\nc\n").expect("write log");
    let out = ralph(temp.path(), &["log", "-n", "2"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out), "b\nc\n");

    let out = ralph(temp.path(), &["clear"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(!paths.run_dir.exists());
    let out = ralph(temp.path(), &["clear"]);
    assert!(stdout(&out).contains("No run to clear"));
}
