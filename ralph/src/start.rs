//! Orchestration for starting and resuming a run.
//!
//! Starting a run validates the PRD, creates a fresh `ralph/<slug>-<stamp>`
//! branch from the current branch, makes sure `.ralph/` is git-ignored, and
//! writes the initial run state. The loop itself is driven by
//! [`crate::run_loop::RunLoop`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, info};

use crate::agents::definition::AgentKind;
use crate::core::items::ItemSet;
use crate::error::RalphError;
use crate::io::config::RalphConfig;
use crate::io::git::{VersionControl, generate_branch_name};
use crate::io::item_store::load_item_set;
use crate::io::paths::RalphPaths;
use crate::io::run_state::{
    NewRun, RunState, ensure_gitignored, load_run_state, run_state_exists, write_run_state,
};
use crate::run_loop::LoopSettings;

/// Flags of `ralph start`. `None` falls back to the config file.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub prd_path: PathBuf,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub push: bool,
    pub force: bool,
    pub watchdog_timeout: Option<i64>,
}

/// A freshly started run.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub state: RunState,
    pub items: ItemSet,
    pub agent: AgentKind,
}

impl StartOutcome {
    /// True when the PRD has nothing left to do.
    pub fn is_complete(&self) -> bool {
        self.items.next_item().is_none()
    }
}

/// Validate inputs and create the run branch and state.
///
/// Nothing is written until every check has passed.
pub fn prepare_run<V: VersionControl>(
    paths: &RalphPaths,
    config: &RalphConfig,
    opts: &StartOptions,
    vcs: &V,
    now: DateTime<Local>,
) -> Result<StartOutcome> {
    if run_state_exists(paths) {
        return Err(RalphError::RunAlreadyActive.into());
    }
    let prd_path = absolute(&paths.resolve(&opts.prd_path));
    let items = load_item_set(&prd_path)?;
    let agent_name = opts.agent.as_deref().unwrap_or(&config.agent);
    let agent = AgentKind::from_name(agent_name)?;

    let dirty = vcs.is_dirty()?;
    if dirty && !opts.force {
        return Err(RalphError::DirtyWorkingTree.into());
    }

    let base_branch = vcs.current_branch()?;
    let branch = generate_branch_name(&config.branch_prefix, &items.project, now);
    vcs.create_branch(&branch)
        .with_context(|| format!("create branch {branch}"))?;
    info!(%branch, base = %base_branch, "created run branch");

    if ensure_gitignored(paths)? && !dirty {
        vcs.stage_all()?;
        vcs.commit("[ralph] ignore run directory", "")?;
        debug!("committed .gitignore update");
    }

    let state = RunState::new(
        NewRun {
            branch,
            base_branch,
            prd_path,
            agent: agent.name().to_string(),
            model: opts.model.clone(),
            auto_push: opts.push,
            watchdog_timeout: opts
                .watchdog_timeout
                .unwrap_or(config.watchdog_timeout_secs),
        },
        now.with_timezone(&Utc),
    );
    write_run_state(&paths.state_path, &state)?;
    info!(
        items = items.total_count(),
        agent = %agent,
        "run started"
    );
    Ok(StartOutcome {
        state,
        items,
        agent,
    })
}

/// Load the active run and make sure its branch is checked out.
pub fn prepare_resume<V: VersionControl>(paths: &RalphPaths, vcs: &V) -> Result<RunState> {
    let state = load_run_state(&paths.state_path)?;
    let current = vcs.current_branch()?;
    if current != state.branch {
        info!(from = %current, to = %state.branch, "switching to run branch");
        vcs.checkout(&state.branch)
            .with_context(|| format!("checkout run branch {}", state.branch))?;
    }
    Ok(state)
}

/// Fail early with [`RalphError::AgentNotFound`] if the agent CLI is missing.
///
/// The error names the agents that are installed, if any.
pub fn ensure_agent_available(kind: AgentKind) -> Result<PathBuf> {
    match kind.locate() {
        Ok(path) => {
            debug!(agent = %kind, path = %path.display(), "agent located");
            Ok(path)
        }
        Err(err) => {
            let hint = missing_agent_hint(kind, &AgentKind::available());
            Err(anyhow::Error::new(err).context(hint))
        }
    }
}

fn missing_agent_hint(missing: AgentKind, installed: &[AgentKind]) -> String {
    let others: Vec<String> = installed
        .iter()
        .filter(|kind| **kind != missing)
        .map(|kind| format!("{} ({kind})", kind.spec().display_name))
        .collect();
    let name = missing.spec().display_name;
    if others.is_empty() {
        format!("{name} is not installed and no other supported agent was found on PATH")
    } else {
        format!("{name} is not installed; installed agents: {} (use --agent)", others.join(", "))
    }
}

/// Loop settings resolved from config and environment.
pub fn loop_settings(config: &RalphConfig, agent: AgentKind) -> LoopSettings {
    LoopSettings {
        hook_timeout: Duration::from_secs(config.hook_timeout_secs),
        session_url: config
            .effective_session_url()
            .filter(|_| agent.supports_sessions()),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::item_store::write_item_set;
    use crate::test_support::{FakeVcs, item, item_set};
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 3, 1, 9, 30, 0)
            .single()
            .expect("valid time")
    }

    fn setup() -> (tempfile::TempDir, RalphPaths, StartOptions) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RalphPaths::new(temp.path());
        let set = item_set(vec![item(1, 1, false), item(2, 2, false)]);
        write_item_set(&paths.root.join("prd.json"), &set).expect("write prd");
        let opts = StartOptions {
            prd_path: PathBuf::from("prd.json"),
            ..StartOptions::default()
        };
        (temp, paths, opts)
    }

    /// Verifies a clean start creates the branch, ignores `.ralph/`, and
    /// persists run state.
    #[test]
    fn start_creates_branch_and_state() {
        let (_temp, paths, mut opts) = setup();
        opts.model = Some("sonnet".to_string());
        opts.push = true;
        let vcs = FakeVcs::with_shas(&[]);

        let outcome = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).expect("start");

        assert_eq!(outcome.state.branch, "ralph/demo-20250301-0930");
        assert_eq!(outcome.state.base_branch, "main");
        assert_eq!(outcome.state.agent, "claude");
        assert_eq!(outcome.state.watchdog_timeout, 600);
        assert!(outcome.state.auto_push);
        assert!(outcome.state.prd_path.is_absolute());
        assert!(!outcome.is_complete());
        assert_eq!(
            vcs.calls(),
            vec![
                "create_branch ralph/demo-20250301-0930".to_string(),
                "stage_all".to_string(),
                "commit [ralph] ignore run directory".to_string(),
            ]
        );
        let saved = load_run_state(&paths.state_path).expect("state");
        assert_eq!(saved, outcome.state);
        assert_eq!(
            std::fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            ".ralph/\n"
        );
    }

    #[test]
    fn start_refuses_active_run() {
        let (_temp, paths, opts) = setup();
        let vcs = FakeVcs::with_shas(&[]);
        prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).expect("first");
        let err = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RalphError>(),
            Some(&RalphError::RunAlreadyActive)
        );
    }

    #[test]
    fn start_refuses_dirty_tree_unless_forced() {
        let (_temp, paths, mut opts) = setup();
        let vcs = FakeVcs::with_shas(&[]);
        vcs.set_dirty(true);
        let err = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RalphError>(),
            Some(&RalphError::DirtyWorkingTree)
        );
        assert!(vcs.calls().is_empty());
        assert!(!run_state_exists(&paths));

        opts.force = true;
        prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).expect("forced");
        // The dirty tree is not committed on the user's behalf.
        assert_eq!(vcs.calls(), vec!["create_branch ralph/demo-20250301-0930".to_string()]);
    }

    #[test]
    fn start_rejects_unknown_agent_and_invalid_prd() {
        let (_temp, paths, mut opts) = setup();
        let vcs = FakeVcs::with_shas(&[]);
        opts.agent = Some("copilot".to_string());
        let err = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RalphError>(),
            Some(RalphError::UnknownAgent { .. })
        ));

        std::fs::write(paths.root.join("bad.json"), "{\"project\": \"\"}").expect("write");
        opts.agent = None;
        opts.prd_path = PathBuf::from("bad.json");
        let err = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RalphError>(),
            Some(RalphError::InvalidItemSet { .. })
        ));
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn flags_override_config() {
        let (_temp, paths, mut opts) = setup();
        let config = RalphConfig {
            agent: "gemini".to_string(),
            watchdog_timeout_secs: 120,
            branch_prefix: "auto/".to_string(),
            ..RalphConfig::default()
        };
        opts.watchdog_timeout = Some(0);
        let outcome =
            prepare_run(&paths, &config, &opts, &FakeVcs::with_shas(&[]), now()).expect("start");
        assert_eq!(outcome.agent, AgentKind::Gemini);
        assert_eq!(outcome.state.watchdog_timeout, 0);
        assert!(outcome.state.branch.starts_with("auto/demo-"));
    }

    #[test]
    fn resume_checks_out_run_branch() {
        let (_temp, paths, opts) = setup();
        let vcs = FakeVcs::with_shas(&[]);
        let started = prepare_run(&paths, &RalphConfig::default(), &opts, &vcs, now()).expect("start");
        vcs.checkout("main").expect("checkout");

        let state = prepare_resume(&paths, &vcs).expect("resume");
        assert_eq!(state.branch, started.state.branch);
        assert_eq!(vcs.current_branch().expect("branch"), started.state.branch);
    }

    #[test]
    fn resume_without_run_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = prepare_resume(&RalphPaths::new(temp.path()), &FakeVcs::with_shas(&[])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RalphError>(),
            Some(&RalphError::RunStateNotFound)
        );
    }

    #[test]
    fn session_url_only_for_supporting_agents() {
        let config = RalphConfig {
            session_url: Some("wss://example.test/session".to_string()),
            ..RalphConfig::default()
        };
        // The env override is unset in tests; the config value applies.
        if std::env::var(crate::io::config::SESSION_URL_ENV).is_err() {
            assert_eq!(
                loop_settings(&config, AgentKind::Claude).session_url.as_deref(),
                Some("wss://example.test/session")
            );
        }
        assert_eq!(loop_settings(&config, AgentKind::Codex).session_url, None);
        assert_eq!(
            loop_settings(&config, AgentKind::Claude).hook_timeout,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn missing_agent_hint_lists_installed_alternatives() {
        assert_eq!(
            missing_agent_hint(AgentKind::Claude, &[AgentKind::Codex, AgentKind::Gemini]),
            "Claude Code is not installed; installed agents: Codex CLI (codex), Gemini CLI (gemini) (use --agent)"
        );
        assert_eq!(
            missing_agent_hint(AgentKind::Codex, &[]),
            "Codex CLI is not installed and no other supported agent was found on PATH"
        );
    }
}
