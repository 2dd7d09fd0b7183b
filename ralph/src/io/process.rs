//! Run child processes with a wall-clock timeout and bounded output.
//!
//! Used for hooks, test commands and PR CLIs. Agent runs stream instead and
//! live in `agents::executor`.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Default cap on captured bytes per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

const READ_CHUNK: usize = 8192;

/// How long to wait for output after a timeout kill before giving up on it.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One captured stream. Bytes past the limit are counted, not kept.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn push_to(&self, label: &str, out: &mut String) {
        out.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            out.push_str(&format!("\n[{label} truncated {} bytes]\n", self.dropped));
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or -1 when the process was killed by a signal or timed out.
    pub fn exit_code(&self) -> i32 {
        match (self.timed_out, self.status.code()) {
            (false, Some(code)) => code,
            _ => -1,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// stdout followed by stderr, lossily decoded.
    pub fn combined_text(&self) -> String {
        let mut text = String::new();
        self.stdout.push_to("stdout", &mut text);
        self.stderr.push_to("stderr", &mut text);
        text
    }
}

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child cannot block on a full pipe. On unix the child leads its own
/// process group; a child that outlives `timeout` is killed together with
/// everything it spawned and reported with `timed_out = true`. Output still
/// held open by an escaped descendant is abandoned after a short grace
/// period, so the call returns within roughly `timeout`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, "failed to spawn command");
        anyhow::Error::new(err).context("spawn command")
    })?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;
    let readers = (
        capture(stdout, output_limit_bytes),
        capture(stderr, output_limit_bytes),
    );

    let waited = child.wait_timeout(timeout).context("wait for command")?;
    let timed_out = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain = if timed_out {
        DRAIN_GRACE
    } else {
        timeout.saturating_sub(started.elapsed()).max(DRAIN_GRACE)
    };
    let deadline = Instant::now() + drain;
    let stdout = collect(&readers.0, deadline).context("collect stdout")?;
    let stderr = collect(&readers.1, deadline).context("collect stderr")?;
    if stdout.dropped + stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn capture<R: Read + Send + 'static>(mut reader: R, limit: usize) -> Receiver<Result<Captured>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut read_all = || -> Result<Captured> {
            let mut captured = Captured::default();
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                let n = reader.read(&mut chunk).context("read output")?;
                if n == 0 {
                    return Ok(captured);
                }
                let keep = n.min(limit.saturating_sub(captured.bytes.len()));
                captured.bytes.extend_from_slice(&chunk[..keep]);
                captured.dropped += n - keep;
            }
        };
        // The receiver is gone if the caller stopped waiting.
        let _ = tx.send(read_all());
    });
    rx
}

fn collect(reader: &Receiver<Result<Captured>>, deadline: Instant) -> Result<Captured> {
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still open after the command ended, abandoning it");
            Ok(Captured::default())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(group, Signal::SIGKILL) {
        warn!(%err, "failed to kill process group, killing the child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(!out.success());
        assert_eq!(out.exit_code(), 3);
        assert_eq!(out.stdout.text(), "out\n");
        assert_eq!(out.combined_text(), "out\nerr\n");
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command_with_timeout(sh("sleep 5"), Duration::from_millis(200), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code(), -1);
    }

    #[test]
    fn timeout_also_kills_grandchildren() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("echo begun; sleep 4; true"),
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(out.stdout.text(), "begun\n");
    }

    #[test]
    fn drops_bytes_past_limit() {
        let out = run_command_with_timeout(sh("printf 'abcdefghij'"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert!(out.combined_text().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_command_with_timeout(
            Command::new("ralph-definitely-not-installed"),
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
