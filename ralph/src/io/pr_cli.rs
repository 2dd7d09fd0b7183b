//! Pull/merge request creation through the hosting service's CLI.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use super::git::RemoteHost;
use super::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

const PR_CLI_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrCreation {
    /// The CLI printed the new request's URL.
    Created { url: String },
    /// The CLI ran (or could not be started) and did not create a request.
    Failed { message: String },
    /// No CLI is known for this remote.
    Unsupported,
}

/// Argv for the host's CLI, if there is one.
pub fn pr_command(host: RemoteHost, title: &str, body: &str) -> Option<Vec<String>> {
    let parts: &[&str] = match host {
        RemoteHost::GitHub => &["gh", "pr", "create", "--title", title, "--body", body],
        RemoteHost::GitLab => &["glab", "mr", "create", "--title", title, "--description", body],
        RemoteHost::Other => return None,
    };
    Some(parts.iter().map(|p| p.to_string()).collect())
}

pub fn create_pull_request(workdir: &Path, host: RemoteHost, title: &str, body: &str) -> PrCreation {
    let Some(argv) = pr_command(host, title, body) else {
        return PrCreation::Unsupported;
    };
    let program = argv[0].clone();
    let mut cmd = Command::new(&program);
    cmd.args(&argv[1..]).current_dir(workdir);
    info!(%program, "creating pull request");

    match run_command_with_timeout(cmd, PR_CLI_TIMEOUT, DEFAULT_OUTPUT_LIMIT_BYTES) {
        Ok(out) if out.success() => {
            let stdout = out.stdout.text();
            let url = stdout
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| line.starts_with("http"))
                .unwrap_or_else(|| stdout.trim())
                .to_string();
            PrCreation::Created { url }
        }
        Ok(out) => {
            let message = out.stderr.text().trim().to_string();
            warn!(%program, exit_code = out.exit_code(), "pull request creation failed");
            PrCreation::Failed {
                message: format!("{program} failed: {message}"),
            }
        }
        Err(err) => {
            let not_found = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == ErrorKind::NotFound);
            let message = if not_found {
                format!("{program} not found")
            } else {
                format!("{err:#}")
            };
            PrCreation::Failed { message }
        }
    }
}
