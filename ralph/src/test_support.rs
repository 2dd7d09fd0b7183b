//! Test-only fixtures: item builders, a scratch git repository, and scripted
//! stand-ins for the agent, test runner, version control, and reporter.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde_json::Map;
use tempfile::TempDir;

use crate::agents::executor::{AgentExecutor, AgentRequest, AgentRun};
use crate::agents::watchdog::{WatchdogCallback, WatchdogResult};
use crate::core::items::{Hooks, Item, ItemSet};
use crate::core::phase::Phase;
use crate::error::RalphError;
use crate::io::git::{DiffStat, VersionControl};
use crate::io::run_state::Checkpoint;
use crate::io::test_runner::TestRunner;
use crate::report::RunReporter;

/// Create a deterministic item titled `Item <id>`.
pub fn item(id: u32, priority: i64, passes: bool) -> Item {
    Item {
        id,
        category: "feature".to_string(),
        title: format!("Item {id}"),
        description: format!("Implement item {id}"),
        priority,
        passes,
        verification: String::new(),
        steps: Vec::new(),
        notes: String::new(),
    }
}

/// Wrap items in a minimal valid item set.
pub fn item_set(items: Vec<Item>) -> ItemSet {
    ItemSet {
        project: "Demo".to_string(),
        goal: "Ship the demo".to_string(),
        tech_stack: Map::new(),
        context: Map::new(),
        items,
        hooks: Hooks::default(),
    }
}

/// A throwaway git repository on branch `main` with one commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let root = dir.path();
        git(root, &["init", "-q", "-b", "main"])?;
        git(root, &["config", "user.email", "test@example.com"])?;
        git(root, &["config", "user.name", "test"])?;
        git(root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "hi\n").context("write README.md")?;
        git(root, &["add", "README.md"])?;
        git(root, &["commit", "-q", "-m", "chore: init"])?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Run git in the repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(self.root(), args)
    }

    /// Write `contents` to `rel` and commit it.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        fs::write(self.root().join(rel), contents).with_context(|| format!("write {rel}"))?;
        git(self.root(), &["add", rel])?;
        git(self.root(), &["commit", "-q", "-m", message])?;
        Ok(())
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// One canned agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub exit_code: i32,
    pub lines: Vec<String>,
    /// `(relative path, contents)` written into the workdir before exiting.
    pub files: Vec<(String, String)>,
}

/// Replays queued runs; once the queue is empty every run succeeds silently.
#[derive(Default)]
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<ScriptedRun>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::default()
    }

    /// One run per exit code, in order.
    pub fn exiting(codes: &[i32]) -> Self {
        Self::new(
            codes
                .iter()
                .map(|code| ScriptedRun {
                    exit_code: *code,
                    ..ScriptedRun::default()
                })
                .collect(),
        )
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        Self::new(vec![ScriptedRun {
            lines: lines.iter().map(|line| line.to_string()).collect(),
            ..ScriptedRun::default()
        }])
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl AgentExecutor for ScriptedAgent {
    fn run(
        &self,
        request: &AgentRequest,
        on_line: &mut dyn FnMut(&str),
        _on_watchdog: Option<WatchdogCallback>,
    ) -> AgentRun {
        self.requests.borrow_mut().push(request.clone());
        let run = self.runs.borrow_mut().pop_front().unwrap_or_default();
        for (rel, contents) in &run.files {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create agent file parent");
            }
            fs::write(&path, contents).expect("write agent file");
        }
        if let Some(log_path) = &request.log_path {
            let mut log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .expect("open agent log");
            for line in &run.lines {
                writeln!(log, "{line}").expect("append agent log");
            }
        }
        for line in &run.lines {
            on_line(line);
        }
        AgentRun {
            exit_code: run.exit_code,
            output: run.lines.join("\n"),
            watchdog: WatchdogResult::disabled(),
        }
    }
}

/// Replays queued test results; passes once the queue is empty.
#[derive(Default)]
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<Result<String, RalphError>>>,
    calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with_results(results: Vec<Result<String, RalphError>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run_tests(&self, _workdir: &Path) -> Result<String, RalphError> {
        self.calls.set(self.calls.get() + 1);
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

/// In-memory version control that records every mutating call.
pub struct FakeVcs {
    shas: RefCell<VecDeque<String>>,
    generated: Cell<u32>,
    staged: RefCell<Vec<String>>,
    dirty: Cell<bool>,
    push_fails: Cell<bool>,
    revert_fails: Cell<bool>,
    empty_commits: RefCell<BTreeSet<String>>,
    head_files: RefCell<BTreeMap<PathBuf, String>>,
    branch: RefCell<String>,
    branches: RefCell<BTreeSet<String>>,
    remote: RefCell<Option<String>>,
    calls: RefCell<Vec<String>>,
    commits: RefCell<Vec<String>>,
    restored: RefCell<Vec<PathBuf>>,
}

impl FakeVcs {
    /// Commits return `shas` in order, then generated hex ids.
    pub fn with_shas(shas: &[&str]) -> Self {
        Self {
            shas: RefCell::new(shas.iter().map(|sha| sha.to_string()).collect()),
            generated: Cell::new(0),
            staged: RefCell::new(Vec::new()),
            dirty: Cell::new(false),
            push_fails: Cell::new(false),
            revert_fails: Cell::new(false),
            empty_commits: RefCell::new(BTreeSet::new()),
            head_files: RefCell::new(BTreeMap::new()),
            branch: RefCell::new("main".to_string()),
            branches: RefCell::new(BTreeSet::from(["main".to_string()])),
            remote: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
            commits: RefCell::new(Vec::new()),
            restored: RefCell::new(Vec::new()),
        }
    }

    /// Files reported by every subsequent `stage_all`.
    pub fn set_staged(&self, files: &[&str]) {
        *self.staged.borrow_mut() = files.iter().map(|f| f.to_string()).collect();
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    pub fn set_remote(&self, url: &str) {
        *self.remote.borrow_mut() = Some(url.to_string());
    }

    pub fn fail_push(&self) {
        self.push_fails.set(true);
    }

    /// Every subsequent `revert_commit` fails as if it conflicted.
    pub fn fail_revert(&self) {
        self.revert_fails.set(true);
    }

    /// Commits that change no files.
    pub fn set_empty_commits(&self, shas: &[&str]) {
        *self.empty_commits.borrow_mut() = shas.iter().map(|sha| sha.to_string()).collect();
    }

    /// Treat `path` as tracked with `contents` at HEAD; `restore_file` writes
    /// them back to disk.
    pub fn track_file(&self, path: &Path, contents: &str) {
        self.head_files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Commit messages as `subject\n\nbody`.
    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    /// Paths passed to `restore_file`, kept apart from [`FakeVcs::calls`].
    pub fn restored(&self) -> Vec<PathBuf> {
        self.restored.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl VersionControl for FakeVcs {
    fn is_dirty(&self) -> Result<bool> {
        Ok(self.dirty.get())
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.branch.borrow().clone())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.branches.borrow().contains(name))
    }

    fn default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.record(format!("create_branch {name}"));
        if !self.branches.borrow_mut().insert(name.to_string()) {
            return Err(RalphError::VersionControl {
                command: format!("checkout -b {name}"),
                message: "branch already exists".to_string(),
            }
            .into());
        }
        *self.branch.borrow_mut() = name.to_string();
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        self.record(format!("checkout {name}"));
        *self.branch.borrow_mut() = name.to_string();
        Ok(())
    }

    fn stage_all(&self) -> Result<Vec<String>> {
        self.record("stage_all".to_string());
        self.dirty.set(false);
        Ok(self.staged.borrow().clone())
    }

    fn commit(&self, message: &str, body: &str) -> Result<String> {
        self.record(format!("commit {message}"));
        self.commits.borrow_mut().push(format!("{message}\n\n{body}"));
        let sha = self.shas.borrow_mut().pop_front().unwrap_or_else(|| {
            let next = self.generated.get() + 1;
            self.generated.set(next);
            format!("{next:08x}")
        });
        Ok(sha)
    }

    fn revert_commit(&self, sha: &str) -> Result<()> {
        self.record(format!("revert {sha}"));
        if self.revert_fails.get() {
            return Err(RalphError::VersionControl {
                command: format!("revert {sha} --no-edit"),
                message: "conflict".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.record(format!("reset --hard {rev}"));
        Ok(())
    }

    fn restore_file(&self, path: &Path) -> Result<()> {
        self.restored.borrow_mut().push(path.to_path_buf());
        if let Some(contents) = self.head_files.borrow().get(path) {
            fs::write(path, contents).with_context(|| format!("restore {}", path.display()))?;
        }
        Ok(())
    }

    fn push(&self, branch: &str, set_upstream: bool) -> Result<()> {
        let flag = if set_upstream { "-u " } else { "" };
        self.record(format!("push {flag}{branch}"));
        if self.push_fails.get() {
            return Err(RalphError::VersionControl {
                command: format!("push {flag}origin {branch}"),
                message: "no remote".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn merge_base(&self, _branch: &str) -> Result<String> {
        Ok("base0000".to_string())
    }

    fn diff_stat(&self, _base: &str) -> Result<DiffStat> {
        Ok(DiffStat::default())
    }

    fn remote_url(&self) -> Result<Option<String>> {
        Ok(self.remote.borrow().clone())
    }

    fn is_empty_commit(&self, sha: &str) -> Result<bool> {
        Ok(self.empty_commits.borrow().contains(sha))
    }
}

/// Collects what the run loop reports.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub reconciled: Vec<u32>,
    pub started: Vec<u32>,
    pub phases: Vec<Phase>,
    pub lines: Vec<String>,
    pub warnings: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,
    pub halts: Vec<(u32, RalphError)>,
}

impl RunReporter for RecordingReporter {
    fn reconciled(&mut self, item_ids: &[u32]) {
        self.reconciled.extend_from_slice(item_ids);
    }

    fn item_started(&mut self, item: &Item, _position: usize, _total: usize) {
        self.started.push(item.id);
    }

    fn phase_changed(&mut self, _item_id: Option<u32>, phase: Phase) {
        self.phases.push(phase);
    }

    fn agent_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn checkpoint_created(&mut self, _item: &Item, checkpoint: &Checkpoint) {
        self.checkpoints.push(checkpoint.clone());
    }

    fn halted(&mut self, item_id: u32, reason: &RalphError) {
        self.halts.push((item_id, reason.clone()));
    }
}
