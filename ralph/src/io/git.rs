//! Git adapter for checkpoints, rollback, and run branches.
//!
//! Every operation is a `git` subprocess in the working root. The
//! [`VersionControl`] trait is the seam the run loop and rollback use, so
//! sequencing tests can substitute a recording fake.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::error::RalphError;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Summary of `git diff --stat <base> HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub files: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub raw: String,
}

/// Hosting service behind `origin`, which decides the PR CLI to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteHost {
    GitHub,
    GitLab,
    Other,
}

impl RemoteHost {
    pub fn from_url(url: &str) -> Self {
        if url.contains("github.com") {
            RemoteHost::GitHub
        } else if url.to_lowercase().contains("gitlab") {
            RemoteHost::GitLab
        } else {
            RemoteHost::Other
        }
    }
}

/// Version-control operations the run engine depends on.
pub trait VersionControl {
    /// True if there are staged, unstaged, or untracked changes.
    fn is_dirty(&self) -> Result<bool>;
    /// Current branch name (errors on detached HEAD).
    fn current_branch(&self) -> Result<String>;
    fn branch_exists(&self, name: &str) -> Result<bool>;
    /// `main` or `master` if present, otherwise the current branch.
    fn default_branch(&self) -> Result<String>;
    /// Create and check out a new branch; fails if it already exists.
    fn create_branch(&self, name: &str) -> Result<()>;
    /// Check out an existing branch; fails if it does not exist.
    fn checkout(&self, name: &str) -> Result<()>;
    /// Stage every change and return the changed paths.
    fn stage_all(&self) -> Result<Vec<String>>;
    /// Commit what is staged (even nothing) and return the new commit id.
    fn commit(&self, message: &str, body: &str) -> Result<String>;
    /// Create an inverse commit for `sha`.
    fn revert_commit(&self, sha: &str) -> Result<()>;
    /// Move the branch and working tree to `rev`, discarding changes.
    fn reset_hard(&self, rev: &str) -> Result<()>;
    /// Drop uncommitted changes to `path` if git tracks it; otherwise a no-op.
    fn restore_file(&self, path: &Path) -> Result<()>;
    fn push(&self, branch: &str, set_upstream: bool) -> Result<()>;
    fn merge_base(&self, branch: &str) -> Result<String>;
    fn diff_stat(&self, base: &str) -> Result<DiffStat>;
    fn remote_url(&self) -> Result<Option<String>>;
    /// True if `sha` changes no files relative to its first parent.
    fn is_empty_commit(&self, sha: &str) -> Result<bool>;

    fn remote_host(&self) -> Result<RemoteHost> {
        Ok(self
            .remote_url()?
            .as_deref()
            .map_or(RemoteHost::Other, RemoteHost::from_url))
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            warn!(command = %args.join(" "), "git command failed");
            return Err(Git::fail(&args.join(" "), failure_message(&output)));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }

    fn fail(command: &str, message: impl Into<String>) -> anyhow::Error {
        RalphError::VersionControl {
            command: command.to_string(),
            message: message.into(),
        }
        .into()
    }
}

impl VersionControl for Git {
    fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(Self::fail("rev-parse --abbrev-ref HEAD", "detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{name}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn default_branch(&self) -> Result<String> {
        for name in ["main", "master"] {
            if self.branch_exists(name)? {
                return Ok(name.to_string());
            }
        }
        self.current_branch()
    }

    #[instrument(skip_all, fields(branch = name))]
    fn create_branch(&self, name: &str) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(Self::fail(
                &format!("checkout -b {name}"),
                format!("branch already exists: {name}"),
            ));
        }
        debug!("creating and checking out new branch");
        self.run_checked(&["checkout", "-b", name])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = name))]
    fn checkout(&self, name: &str) -> Result<()> {
        if !self.branch_exists(name)? {
            return Err(Self::fail(
                &format!("checkout {name}"),
                format!("branch not found: {name}"),
            ));
        }
        self.run_checked(&["checkout", name])?;
        Ok(())
    }

    fn stage_all(&self) -> Result<Vec<String>> {
        let changed = self
            .status_porcelain()?
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        self.run_checked(&["add", "-A"])?;
        Ok(changed)
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str, body: &str) -> Result<String> {
        let mut args = vec!["commit", "--allow-empty", "-m", message];
        if !body.is_empty() {
            args.extend(["-m", body]);
        }
        self.run_checked(&args)?;
        let sha = self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string();
        debug!(%sha, "committed");
        Ok(sha)
    }

    #[instrument(skip_all, fields(sha = sha))]
    fn revert_commit(&self, sha: &str) -> Result<()> {
        self.run_checked(&["revert", sha, "--no-edit"])?;
        Ok(())
    }

    #[instrument(skip_all, fields(rev = rev))]
    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run_checked(&["reset", "--hard", rev])?;
        Ok(())
    }

    fn restore_file(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let tracked = self
            .run(&["ls-files", "--error-unmatch", "--", &path])?
            .status
            .success();
        if tracked {
            debug!(%path, "restoring file from HEAD");
            self.run_checked(&["checkout", "HEAD", "--", &path])?;
        }
        Ok(())
    }

    fn push(&self, branch: &str, set_upstream: bool) -> Result<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.extend(["origin", branch]);
        self.run_checked(&args)?;
        Ok(())
    }

    fn merge_base(&self, branch: &str) -> Result<String> {
        Ok(self
            .run_capture(&["merge-base", "HEAD", branch])?
            .trim()
            .to_string())
    }

    fn diff_stat(&self, base: &str) -> Result<DiffStat> {
        let raw = self.run_capture(&["diff", "--stat", base, "HEAD"])?;
        Ok(parse_diff_stat(&raw))
    }

    fn remote_url(&self) -> Result<Option<String>> {
        let output = self.run(&["remote", "get-url", "origin"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!url.is_empty()).then_some(url))
    }

    #[instrument(skip_all, fields(sha = sha))]
    fn is_empty_commit(&self, sha: &str) -> Result<bool> {
        let parent = format!("{sha}^");
        let args = ["diff", "--quiet", parent.as_str(), sha];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Git::fail(&args.join(" "), failure_message(&output))),
        }
    }
}

/// stderr, or stdout when git reported the failure there (e.g. `revert`'s
/// "nothing to commit").
fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(Git::fail("status --porcelain", format!("unexpected line: '{line}'")));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

/// Parse the summary line of `git diff --stat`.
pub fn parse_diff_stat(raw: &str) -> DiffStat {
    static FILES: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+) files? changed").expect("valid regex"));
    static INSERTIONS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+) insertions?").expect("valid regex"));
    static DELETIONS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+) deletions?").expect("valid regex"));

    let summary = raw.trim().lines().last().unwrap_or_default();
    let count = |re: &Regex| {
        re.captures(summary)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    DiffStat {
        files: count(&FILES),
        insertions: count(&INSERTIONS),
        deletions: count(&DELETIONS),
        raw: raw.to_string(),
    }
}

/// Lowercased project name with spaces/underscores as dashes and every other
/// non-alphanumeric character dropped.
pub fn slugify(project: &str) -> String {
    project
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect()
}

/// `<prefix><slug>-<YYYYmmdd-HHMM>`.
pub fn generate_branch_name(prefix: &str, project: &str, now: DateTime<Local>) -> String {
    format!("{prefix}{}-{}", slugify(project), now.format("%Y%m%d-%H%M"))
}
