//! Spawns an agent, streams its output, and watches it for silence.
//!
//! stdout and stderr are read on two threads that feed one line channel; the
//! calling thread drains that channel and fans each line out to the capture
//! buffer, the watchdog, the caller's listener, and the run log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;

use tracing::{debug, info, instrument, warn};

use super::definition::AgentKind;
use super::watchdog::{Watchdog, WatchdogCallback, WatchdogResult};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    /// Rendered task text.
    pub task: String,
    pub model: Option<String>,
    pub session_url: Option<String>,
    /// Seconds; `<= 0` disables the watchdog.
    pub watchdog_timeout_secs: i64,
    /// Every output line is appended here when set.
    pub log_path: Option<PathBuf>,
}

/// What came back from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub exit_code: i32,
    pub output: String,
    pub watchdog: WatchdogResult,
}

impl AgentRun {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn synthetic_failure(output: String, watchdog: WatchdogResult) -> Self {
        Self {
            exit_code: 1,
            output,
            watchdog,
        }
    }
}

/// Abstraction over agent backends.
///
/// Implementations never return an error: launch problems come back as a
/// failed [`AgentRun`].
pub trait AgentExecutor {
    fn run(
        &self,
        request: &AgentRequest,
        on_line: &mut dyn FnMut(&str),
        on_watchdog: Option<WatchdogCallback>,
    ) -> AgentRun;
}

/// Runs one of the supported agent CLIs as a child process.
#[derive(Debug, Clone, Copy)]
pub struct CliAgentExecutor {
    pub kind: AgentKind,
}

impl CliAgentExecutor {
    pub fn new(kind: AgentKind) -> Self {
        Self { kind }
    }
}

impl AgentExecutor for CliAgentExecutor {
    #[instrument(skip_all, fields(agent = %self.kind, workdir = %request.workdir.display()))]
    fn run(
        &self,
        request: &AgentRequest,
        on_line: &mut dyn FnMut(&str),
        on_watchdog: Option<WatchdogCallback>,
    ) -> AgentRun {
        let command = self.kind.build_command(
            &request.task,
            request.model.as_deref(),
            request.session_url.as_deref(),
        );
        let program = match self.kind.locate() {
            Ok(path) => path,
            Err(err) => {
                warn!(%err, "agent executable not found");
                return AgentRun::synthetic_failure(
                    format!("Agent not found: {}", command.program),
                    WatchdogResult::disabled(),
                );
            }
        };

        let mut cmd = Command::new(program);
        cmd.args(&command.args).current_dir(&request.workdir);
        info!(args = command.args.len(), "starting agent");
        run_streaming(cmd, request, on_line, on_watchdog)
    }
}

/// Spawn `cmd` and stream its combined output with a watchdog attached.
///
/// Exposed so other backends (and tests) can reuse the streaming path with an
/// arbitrary command.
pub fn run_streaming(
    mut cmd: Command,
    request: &AgentRequest,
    on_line: &mut dyn FnMut(&str),
    on_watchdog: Option<WatchdogCallback>,
) -> AgentRun {
    let mut watchdog = Watchdog::from_secs(request.watchdog_timeout_secs, on_watchdog);
    watchdog.start();

    let mut captured = String::new();
    let outcome = stream_child(&mut cmd, request.log_path.as_deref(), |line| {
        captured.push_str(line);
        captured.push('\n');
        watchdog.record_output();
        on_line(line);
    });
    let watchdog_result = watchdog.stop();

    match outcome {
        Ok(exit_code) => {
            debug!(exit_code, triggered = watchdog_result.triggered, "agent finished");
            AgentRun {
                exit_code,
                output: captured,
                watchdog: watchdog_result,
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(%err, "agent executable vanished before spawn");
            let program = cmd.get_program().to_string_lossy().into_owned();
            AgentRun::synthetic_failure(format!("Agent not found: {program}"), watchdog_result)
        }
        Err(err) => {
            warn!(%err, "agent run failed");
            AgentRun::synthetic_failure(format!("Error running agent: {err}"), watchdog_result)
        }
    }
}

fn stream_child(
    cmd: &mut Command,
    log_path: Option<&Path>,
    mut on_line: impl FnMut(&str),
) -> io::Result<i32> {
    let mut log = log_path.map(open_log).transpose()?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let readers = [
        spawn_line_reader(stdout, tx.clone()),
        spawn_line_reader(stderr, tx),
    ];

    for line in rx {
        on_line(&line);
        if let Some(file) = log.as_mut()
            && let Err(err) = writeln!(file, "{line}").and_then(|()| file.flush())
        {
            warn!(%err, "failed to append to agent log");
        }
    }

    let status = child.wait()?;
    for reader in readers {
        if reader.join().is_err() {
            warn!("agent output reader panicked");
        }
    }
    Ok(status.code().unwrap_or(-1))
}

fn spawn_line_reader<R: Read + Send + 'static>(reader: R, tx: Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "read agent output");
                    break;
                }
            }
        }
    })
}

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(workdir: &Path, watchdog_timeout_secs: i64, log_path: Option<PathBuf>) -> AgentRequest {
        AgentRequest {
            workdir: workdir.to_path_buf(),
            task: "task".to_string(),
            model: None,
            session_url: None,
            watchdog_timeout_secs,
            log_path,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_both_streams_to_listener_and_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join(".ralph/current.log");
        let req = request(temp.path(), 60, Some(log_path.clone()));
        let mut lines = Vec::new();

        let run = run_streaming(
            sh("echo one; echo two >&2; echo three; exit 0"),
            &req,
            &mut |line| lines.push(line.to_string()),
            None,
        );

        assert!(run.success());
        assert!(!run.watchdog.triggered);
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
        let logged = fs::read_to_string(&log_path).expect("read log");
        assert_eq!(logged.lines().count(), 3);
        assert_eq!(run.output.lines().count(), 3);
    }

    #[test]
    fn log_is_appended_across_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("current.log");
        let req = request(temp.path(), 0, Some(log_path.clone()));
        run_streaming(sh("echo first"), &req, &mut |_| {}, None);
        run_streaming(sh("echo second"), &req, &mut |_| {}, None);
        assert_eq!(
            fs::read_to_string(&log_path).expect("read log"),
            "first\nsecond\n"
        );
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = run_streaming(sh("echo boom; exit 7"), &request(temp.path(), 0, None), &mut |_| {}, None);
        assert_eq!(run.exit_code, 7);
        assert_eq!(run.output, "boom\n");
    }

    #[test]
    fn missing_program_is_synthetic_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = run_streaming(
            Command::new("ralph-no-such-agent"),
            &request(temp.path(), 60, None),
            &mut |_| {},
            None,
        );
        assert_eq!(run.exit_code, 1);
        assert_eq!(run.output, "Agent not found: ralph-no-such-agent");
        assert!(!run.watchdog.triggered);
    }

    /// Verifies a silent agent trips the watchdog without being killed.
    #[test]
    fn silent_agent_triggers_watchdog_but_completes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let req = request(temp.path(), 1, None);

        let run = run_streaming(
            sh("echo start; sleep 2; echo done"),
            &req,
            &mut |_| {},
            Some(Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert!(run.success());
        assert!(run.output.ends_with("done\n"));
        assert!(run.watchdog.triggered);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
