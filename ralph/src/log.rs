//! `ralph log`: tail and follow the agent transcript.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::error::RalphError;
use crate::io::paths::RalphPaths;
use crate::io::run_state::run_state_exists;

/// Poll interval for `ralph log -f`.
pub const FOLLOW_POLL: Duration = Duration::from_millis(500);

/// The transcript path of the active run.
///
/// No run is [`RalphError::RunStateNotFound`]; a run that has not produced
/// output yet is a plain error.
pub fn log_path(paths: &RalphPaths) -> Result<&Path> {
    if !run_state_exists(paths) {
        return Err(RalphError::RunStateNotFound.into());
    }
    if !paths.log_path.exists() {
        bail!("no agent log yet at {}", paths.log_path.display());
    }
    Ok(&paths.log_path)
}

/// Last `n` lines of `path`.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut lines = std::collections::VecDeque::with_capacity(n.min(1024));
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            continue;
        }
        if lines.len() == n {
            lines.pop_front();
        }
        lines.push_back(line);
    }
    Ok(lines.into())
}

/// Copy bytes appended to `path` into `out` until `keep_going` returns false.
///
/// Starts at the current end of the file. A file that shrinks (truncated or
/// replaced) is read again from the start.
pub fn follow_log<W, K>(path: &Path, out: &mut W, poll: Duration, mut keep_going: K) -> Result<()>
where
    W: Write,
    K: FnMut() -> bool,
{
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut offset = file.seek(SeekFrom::End(0))?;
    let mut buf = Vec::new();
    while keep_going() {
        let len = std::fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        if len < offset {
            file = File::open(path).with_context(|| format!("reopen {}", path.display()))?;
            offset = 0;
        }
        if len > offset {
            file.seek(SeekFrom::Start(offset))?;
            buf.clear();
            let read = (&mut file).take(len - offset).read_to_end(&mut buf)?;
            offset += read as u64;
            out.write_all(&buf)?;
            out.flush()?;
        }
        thread::sleep(poll);
    }
    Ok(())
}
