//! Project test-suite detection and execution.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};
use crate::error::RalphError;

/// Runs the project's tests after the agent's changes are staged.
pub trait TestRunner {
    /// `Ok(output)` when the suite passes. Failures are
    /// [`RalphError::TestFailure`] or [`RalphError::NoTestInfrastructure`].
    fn run_tests(&self, workdir: &Path) -> Result<String, RalphError>;
}

/// Uses the configured command, or auto-detects one from project files.
#[derive(Debug, Clone)]
pub struct DetectingTestRunner {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl DetectingTestRunner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl TestRunner for DetectingTestRunner {
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn run_tests(&self, workdir: &Path) -> Result<String, RalphError> {
        let argv = if self.command.is_empty() {
            detect_test_command(workdir).ok_or(RalphError::NoTestInfrastructure)?
        } else {
            self.command.clone()
        };
        let (program, args) = argv.split_first().ok_or(RalphError::NoTestInfrastructure)?;
        info!(command = %argv.join(" "), "running tests");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        let out = match run_command_with_timeout(cmd, self.timeout, DEFAULT_OUTPUT_LIMIT_BYTES) {
            Ok(out) => out,
            Err(err) => {
                let not_found = err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::NotFound);
                let output = if not_found {
                    format!("Test runner '{program}' not found. Install it or fix the test command.")
                } else {
                    format!("{err:#}")
                };
                warn!(%output, "test runner could not start");
                return Err(RalphError::TestFailure { output });
            }
        };
        if out.timed_out {
            return Err(RalphError::TestFailure {
                output: format!("Tests timed out after {} seconds", self.timeout.as_secs()),
            });
        }
        let output = out.combined_text();
        if out.success() {
            debug!("tests passed");
            Ok(output)
        } else {
            warn!(exit_code = out.exit_code(), "tests failed");
            Err(RalphError::TestFailure { output })
        }
    }
}

/// Test command implied by the project layout, if any.
///
/// Checked in order: a `package.json` with a `test` script, `Cargo.toml`,
/// then Python markers (`pyproject.toml`, `setup.py`, `pytest.ini`, or a
/// `tests/`/`test/` directory).
pub fn detect_test_command(workdir: &Path) -> Option<Vec<String>> {
    let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();

    if has_npm_test_script(&workdir.join("package.json")) {
        return Some(argv(&["npm", "test"]));
    }
    if workdir.join("Cargo.toml").is_file() {
        return Some(argv(&["cargo", "test"]));
    }
    let python_marker = ["pyproject.toml", "setup.py", "pytest.ini"]
        .iter()
        .any(|name| workdir.join(name).is_file());
    let test_dir = ["tests", "test"]
        .iter()
        .any(|name| workdir.join(name).is_dir());
    if python_marker || test_dir {
        return Some(argv(&["pytest", "-v", "--tb=short"]));
    }
    None
}

fn has_npm_test_script(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    let Ok(pkg) = serde_json::from_str::<Value>(&contents) else {
        warn!(path = %path.display(), "package.json is not valid json");
        return false;
    };
    pkg.pointer("/scripts/test")
        .and_then(Value::as_str)
        .is_some_and(|script| !script.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_npm_only_with_test_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("package.json"), r#"{"scripts": {"build": "tsc"}}"#)
            .expect("write");
        assert_eq!(detect_test_command(temp.path()), None);

        fs::write(
            temp.path().join("package.json"),
            r#"{"scripts": {"test": "vitest run"}}"#,
        )
        .expect("write");
        assert_eq!(
            detect_test_command(temp.path()),
            Some(vec!["npm".to_string(), "test".to_string()])
        );
    }

    #[test]
    fn detects_cargo_before_python() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("tests")).expect("mkdir");
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").expect("write");
        assert_eq!(
            detect_test_command(temp.path()).expect("detected")[0],
            "cargo"
        );
    }

    #[test]
    fn detects_pytest_from_tests_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("test")).expect("mkdir");
        assert_eq!(
            detect_test_command(temp.path()),
            Some(vec![
                "pytest".to_string(),
                "-v".to_string(),
                "--tb=short".to_string()
            ])
        );
    }

    #[test]
    fn nothing_detected_is_no_test_infrastructure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = DetectingTestRunner::new(Vec::new(), Duration::from_secs(5));
        assert_eq!(
            runner.run_tests(temp.path()),
            Err(RalphError::NoTestInfrastructure)
        );
    }

    #[test]
    fn configured_command_pass_and_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sh = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];

        let passing = DetectingTestRunner::new(sh("echo 3 passed"), Duration::from_secs(5));
        assert_eq!(passing.run_tests(temp.path()), Ok("3 passed\n".to_string()));

        let failing = DetectingTestRunner::new(sh("echo 1 failed; exit 1"), Duration::from_secs(5));
        assert_eq!(
            failing.run_tests(temp.path()),
            Err(RalphError::TestFailure {
                output: "1 failed\n".to_string()
            })
        );
    }

    #[test]
    fn missing_test_binary_is_a_described_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = DetectingTestRunner::new(
            vec!["ralph-no-such-test-tool".to_string()],
            Duration::from_secs(5),
        );
        match runner.run_tests(temp.path()) {
            Err(RalphError::TestFailure { output }) => {
                assert!(output.contains("'ralph-no-such-test-tool' not found"), "{output}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
