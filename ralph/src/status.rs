//! Read-only reports: `status`, `dry-run`, and `diff`.
//!
//! Each report is a plain struct built from run state, the PRD, and version
//! control, with a `Display` impl for the CLI.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::warn;

use crate::core::items::ItemSet;
use crate::core::phase::Phase;
use crate::error::RalphError;
use crate::io::config::RalphConfig;
use crate::io::git::{DiffStat, VersionControl, generate_branch_name};
use crate::io::item_store::load_item_set;
use crate::io::paths::RalphPaths;
use crate::io::run_state::{RunState, load_run_state, run_state_exists};

/// Silence shorter than this is not worth mentioning.
const SILENCE_REPORT_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub label: String,
    pub elapsed: Option<String>,
    pub phase: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub branch: String,
    pub prd_name: String,
    pub agent: String,
    pub progress: String,
    pub elapsed: String,
    pub eta: Option<String>,
    pub started: String,
    pub current_item: Option<u32>,
    pub action: Option<ActionReport>,
    pub watchdog: String,
    pub pr_url: Option<String>,
    pub dirty: bool,
    pub next_item: Option<(u32, String)>,
}

/// Status of the active run, or `None` when there is none.
pub fn status<V: VersionControl>(
    paths: &RalphPaths,
    vcs: &V,
    now: DateTime<Utc>,
) -> Result<Option<StatusReport>> {
    if !run_state_exists(paths) {
        return Ok(None);
    }
    let state = load_run_state(&paths.state_path)?;
    let set = load_item_set(&paths.resolve(&state.prd_path))?;
    let dirty = vcs.is_dirty().unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "could not check working tree");
        false
    });
    Ok(Some(build_status(&state, &set, dirty, now)))
}

pub fn build_status(state: &RunState, set: &ItemSet, dirty: bool, now: DateTime<Utc>) -> StatusReport {
    let action = (!state.current_action.is_empty()).then(|| ActionReport {
        label: state.current_action.clone(),
        elapsed: state.action_elapsed(now),
        phase: Phase::from_label(&state.current_action).map(Phase::name),
    });
    StatusReport {
        branch: state.branch.clone(),
        prd_name: file_name(&state.prd_path),
        agent: match &state.model {
            Some(model) => format!("{} ({model})", state.agent),
            None => state.agent.clone(),
        },
        progress: set.progress(),
        elapsed: state.elapsed(now),
        eta: state.eta(set.total_count(), now),
        started: state
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        current_item: state.current_item,
        action,
        watchdog: watchdog_summary(state, now),
        pr_url: state.pr_url.clone(),
        dirty,
        next_item: set
            .select_item(state.current_item)
            .map(|item| (item.id, item.title.clone())),
    }
}

fn watchdog_summary(state: &RunState, now: DateTime<Utc>) -> String {
    if state.watchdog_timeout <= 0 {
        return "disabled".to_string();
    }
    let silence = state.silence(now);
    if state.watchdog_triggered {
        return match silence {
            Some(secs) => format!("TRIGGERED (agent silent for {secs}s)"),
            None => "TRIGGERED".to_string(),
        };
    }
    match silence {
        Some(secs) if secs > SILENCE_REPORT_SECS => format!(
            "{}s timeout, agent silent for {secs}s",
            state.watchdog_timeout
        ),
        _ => format!("{}s timeout", state.watchdog_timeout),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Branch:    {}", self.branch)?;
        writeln!(f, "PRD:       {}", self.prd_name)?;
        writeln!(f, "Agent:     {}", self.agent)?;
        writeln!(f, "Progress:  {}", self.progress)?;
        match &self.eta {
            Some(eta) => writeln!(f, "Elapsed:   {} (ETA {eta})", self.elapsed)?,
            None => writeln!(f, "Elapsed:   {}", self.elapsed)?,
        }
        writeln!(f, "Started:   {}", self.started)?;
        if let Some(action) = &self.action {
            write!(f, "Action:    {}", action.label)?;
            if let Some(elapsed) = &action.elapsed {
                write!(f, " ({elapsed})")?;
            }
            if let Some(phase) = action.phase {
                write!(f, " [{phase}]")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "Watchdog:  {}", self.watchdog)?;
        if let Some(url) = &self.pr_url {
            writeln!(f, "PR:        {url}")?;
        }
        if self.dirty {
            writeln!(f, "Warning:   working tree has uncommitted changes")?;
        }
        match &self.next_item {
            Some((id, title)) => writeln!(f, "Next:      item {id}: {title}"),
            None => writeln!(f, "Next:      all items complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunItem {
    pub id: u32,
    pub priority: i64,
    pub title: String,
    pub category: String,
    pub passes: bool,
}

/// What `start` would do with a PRD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunReport {
    pub project: String,
    pub goal: String,
    pub stack: Option<String>,
    /// Run branch if a run is active, otherwise the branch `start` would create.
    pub branch: String,
    pub branch_exists: bool,
    pub items: Vec<DryRunItem>,
    pub remaining: usize,
    pub pre_commit_hooks: usize,
    pub post_item_hooks: usize,
}

/// Summarize `prd` (or the active run's PRD) without changing anything.
pub fn dry_run(
    paths: &RalphPaths,
    config: &RalphConfig,
    prd: Option<&Path>,
    now: DateTime<Local>,
) -> Result<DryRunReport> {
    let state = if run_state_exists(paths) {
        Some(load_run_state(&paths.state_path)?)
    } else {
        None
    };
    let prd_path = match (prd, &state) {
        (Some(path), _) => paths.resolve(path),
        (None, Some(state)) => paths.resolve(&state.prd_path),
        (None, None) => return Err(RalphError::RunStateNotFound.into()),
    };
    let set = load_item_set(&prd_path)?;
    let (branch, branch_exists) = match &state {
        Some(state) => (state.branch.clone(), true),
        None => (
            generate_branch_name(&config.branch_prefix, &set.project, now),
            false,
        ),
    };
    Ok(DryRunReport {
        project: set.project.clone(),
        goal: set.goal.clone(),
        stack: set.stack_summary(),
        branch,
        branch_exists,
        items: set
            .items_by_priority()
            .into_iter()
            .map(|item| DryRunItem {
                id: item.id,
                priority: item.priority,
                title: item.title.clone(),
                category: item.category.clone(),
                passes: item.passes,
            })
            .collect(),
        remaining: set.remaining_count(),
        pre_commit_hooks: set.hooks.pre_commit.len(),
        post_item_hooks: set.hooks.post_item.len(),
    })
}

impl fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Project: {}", self.project)?;
        writeln!(f, "Goal:    {}", self.goal)?;
        if let Some(stack) = &self.stack {
            writeln!(f, "Stack:   {stack}")?;
        }
        let verb = if self.branch_exists { "Run branch" } else { "Would create" };
        writeln!(f, "{verb}: {}", self.branch)?;
        if self.pre_commit_hooks + self.post_item_hooks > 0 {
            writeln!(
                f,
                "Hooks:   {} pre-commit, {} post-item",
                self.pre_commit_hooks, self.post_item_hooks
            )?;
        }
        writeln!(f)?;
        for item in &self.items {
            let mark = if item.passes { "x" } else { " " };
            writeln!(
                f,
                "  [{mark}] {:>3}  P{:<3} {} ({})",
                item.id, item.priority, item.title, item.category
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{} of {} item(s) remaining", self.remaining, self.items.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCommit {
    pub item_id: u32,
    pub title: Option<String>,
    pub short_sha: String,
    pub files_changed: usize,
}

/// Changes made on the run branch since it left the base branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub base_branch: String,
    pub merge_base: String,
    pub stat: DiffStat,
    pub commits: Vec<ItemCommit>,
}

pub fn diff_report<V: VersionControl>(paths: &RalphPaths, vcs: &V) -> Result<DiffReport> {
    let state = load_run_state(&paths.state_path)?;
    let set = load_item_set(&paths.resolve(&state.prd_path)).ok();
    let merge_base = vcs
        .merge_base(&state.base_branch)
        .with_context(|| format!("find merge base with {}", state.base_branch))?;
    let stat = vcs.diff_stat(&merge_base)?;
    let commits = state
        .checkpoints
        .iter()
        .map(|cp| ItemCommit {
            item_id: cp.item_id,
            title: set
                .as_ref()
                .and_then(|set| set.item(cp.item_id))
                .map(|item| item.title.clone()),
            short_sha: cp.commit_sha.chars().take(8).collect(),
            files_changed: cp.files_changed.len(),
        })
        .collect();
    Ok(DiffReport {
        base_branch: state.base_branch,
        merge_base,
        stat,
        commits,
    })
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base: String = self.merge_base.chars().take(8).collect();
        writeln!(f, "Changes since {} ({base}):", self.base_branch)?;
        writeln!(
            f,
            "  {} file(s) changed, {} insertion(s), {} deletion(s)",
            self.stat.files, self.stat.insertions, self.stat.deletions
        )?;
        if !self.commits.is_empty() {
            writeln!(f)?;
            writeln!(f, "Commits by item:")?;
            for commit in &self.commits {
                let title = commit.title.as_deref().unwrap_or("(not in PRD)");
                writeln!(
                    f,
                    "  {} item {}: {title} ({} file(s))",
                    commit.short_sha, commit.item_id, commit.files_changed
                )?;
            }
        }
        if !self.stat.raw.trim().is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.stat.raw)?;
            if !self.stat.raw.ends_with('\n') {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::item_store::write_item_set;
    use crate::io::run_state::{Checkpoint, NewRun, write_run_state};
    use crate::test_support::{FakeVcs, item, item_set};
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0)
            .single()
            .expect("valid time")
            + Duration::seconds(secs)
    }

    fn state() -> RunState {
        RunState::new(
            NewRun {
                branch: "ralph/demo-20250101-1200".to_string(),
                base_branch: "main".to_string(),
                prd_path: PathBuf::from("/work/docs/prd.json"),
                agent: "claude".to_string(),
                model: Some("opus".to_string()),
                auto_push: false,
                watchdog_timeout: 300,
            },
            at(0),
        )
    }

    fn checkpoint(item_id: u32, sha: &str) -> Checkpoint {
        Checkpoint {
            item_id,
            commit_sha: sha.to_string(),
            timestamp: at(60),
            files_changed: vec!["a.rs".to_string(), "b.rs".to_string()],
            tests_passed: true,
            route: String::new(),
        }
    }

    #[test]
    fn status_reports_progress_action_and_next_item() {
        let mut state = state();
        state.add_checkpoint(checkpoint(1, "deadbeef"));
        state.current_item = Some(2);
        state.set_action(Phase::Testing.label(), at(1200));
        let set = item_set(vec![item(1, 1, true), item(2, 1, false), item(3, 2, false)]);

        let report = build_status(&state, &set, false, at(1230));

        assert_eq!(report.prd_name, "prd.json");
        assert_eq!(report.agent, "claude (opus)");
        assert_eq!(report.progress, "1/3");
        assert_eq!(report.elapsed, "20m 30s");
        assert_eq!(report.eta.as_deref(), Some("~41m"));
        let action = report.action.clone().expect("action");
        assert_eq!(action.phase, Some("testing"));
        assert_eq!(report.next_item, Some((2, "Item 2".to_string())));
        assert_eq!(report.watchdog, "300s timeout");
        let text = report.to_string();
        assert!(text.contains("Action:    Running tests..."));
        assert!(!text.contains("Warning"));
    }

    #[test]
    fn status_reports_failed_phase() {
        let mut state = state();
        state.current_item = Some(3);
        state.set_action(Phase::Failed(crate::core::phase::HaltKind::Hooks).label(), at(10));
        let set = item_set(vec![item(1, 1, false), item(3, 2, false)]);
        let report = build_status(&state, &set, true, at(20));
        assert_eq!(report.action.expect("action").phase, Some("failed (hooks)"));
        // The halted item is retried before higher-priority work.
        assert_eq!(report.next_item.map(|(id, _)| id), Some(3));
        assert!(report.dirty);
    }

    #[test]
    fn watchdog_summary_variants() {
        let mut state = state();
        assert_eq!(watchdog_summary(&state, at(0)), "300s timeout");
        state.record_output(at(100));
        assert_eq!(
            watchdog_summary(&state, at(200)),
            "300s timeout, agent silent for 100s"
        );
        state.mark_watchdog_triggered();
        assert_eq!(
            watchdog_summary(&state, at(500)),
            "TRIGGERED (agent silent for 400s)"
        );
        state.watchdog_timeout = 0;
        assert_eq!(watchdog_summary(&state, at(500)), "disabled");
    }

    #[test]
    fn status_without_run_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = status(&RalphPaths::new(temp.path()), &FakeVcs::with_shas(&[]), at(0))
            .expect("status");
        assert!(report.is_none());
    }

    #[test]
    fn dry_run_lists_items_by_priority() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RalphPaths::new(temp.path());
        let mut set = item_set(vec![item(3, 2, false), item(1, 1, true), item(2, 1, false)]);
        set.hooks.pre_commit.push("cargo fmt --check".to_string());
        write_item_set(&paths.root.join("prd.json"), &set).expect("write");
        let now = Local
            .with_ymd_and_hms(2025, 6, 2, 8, 15, 0)
            .single()
            .expect("valid time");

        let report = dry_run(&paths, &RalphConfig::default(), Some(Path::new("prd.json")), now)
            .expect("dry run");

        assert_eq!(report.branch, "ralph/demo-20250602-0815");
        assert!(!report.branch_exists);
        let ids: Vec<u32> = report.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(report.remaining, 2);
        let text = report.to_string();
        assert!(text.contains("Would create: ralph/demo-20250602-0815"));
        assert!(text.contains("Hooks:   1 pre-commit, 0 post-item"));
        assert!(text.contains("2 of 3 item(s) remaining"));
        assert!(!run_state_exists(&paths));
    }

    #[test]
    fn dry_run_without_prd_or_run_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = dry_run(&RalphPaths::new(temp.path()), &RalphConfig::default(), None, Local::now())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RalphError>(),
            Some(&RalphError::RunStateNotFound)
        );
    }

    #[test]
    fn diff_groups_checkpoints_by_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RalphPaths::new(temp.path());
        write_item_set(&paths.root.join("prd.json"), &item_set(vec![item(1, 1, true)]))
            .expect("write prd");
        let mut state = state();
        state.prd_path = PathBuf::from("prd.json");
        state.add_checkpoint(checkpoint(1, "deadbeefcafe"));
        state.add_checkpoint(checkpoint(9, "0123456789"));
        write_run_state(&paths.state_path, &state).expect("write state");

        let report = diff_report(&paths, &FakeVcs::with_shas(&[])).expect("diff");

        assert_eq!(report.merge_base, "base0000");
        assert_eq!(report.commits[0].short_sha, "deadbeef");
        assert_eq!(report.commits[0].title.as_deref(), Some("Item 1"));
        assert_eq!(report.commits[1].title, None);
        let text = report.to_string();
        assert!(text.contains("deadbeef item 1: Item 1 (2 file(s))"));
        assert!(text.contains("01234567 item 9: (not in PRD)"));
    }
}
