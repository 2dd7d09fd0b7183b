//! `ralph pr`: push the run branch and open a pull/merge request.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::core::prompt::{CheckpointRow, PromptEngine, pr_title};
use crate::io::git::{RemoteHost, VersionControl};
use crate::io::item_store::load_item_set;
use crate::io::paths::RalphPaths;
use crate::io::pr_cli::PrCreation;
use crate::io::run_state::{load_run_state, write_run_state};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    /// The request was opened and its URL stored in run state.
    Created { url: String },
    /// Automatic creation was not possible; open it by hand with this content.
    Manual {
        reason: String,
        remote_url: Option<String>,
        title: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrReport {
    pub outcome: PrOutcome,
    pub warnings: Vec<String>,
}

/// Push and open a request with `create` (normally
/// [`crate::io::pr_cli::create_pull_request`]).
///
/// Refuses while items remain unless `force` is set.
pub fn open_pull_request<V, F>(paths: &RalphPaths, vcs: &V, force: bool, create: F) -> Result<PrReport>
where
    V: VersionControl,
    F: FnOnce(&Path, RemoteHost, &str, &str) -> PrCreation,
{
    let mut state = load_run_state(&paths.state_path)?;
    let set = load_item_set(&paths.resolve(&state.prd_path))?;
    let remaining = set.remaining_count();
    if remaining > 0 && !force {
        bail!("{remaining} item(s) still incomplete (use --force to open a PR anyway)");
    }

    let mut warnings = Vec::new();
    if let Err(err) = vcs.push(&state.branch, true) {
        warn!(err = %format!("{err:#}"), "push before PR failed");
        warnings.push(format!("push failed: {err:#}"));
    }

    let rows: Vec<CheckpointRow> = state
        .checkpoints
        .iter()
        .map(|cp| CheckpointRow {
            title: set
                .item(cp.item_id)
                .map(|item| item.title.clone())
                .unwrap_or_else(|| format!("Item {}", cp.item_id)),
            short_sha: cp.commit_sha.chars().take(8).collect(),
            tests_passed: cp.tests_passed,
        })
        .collect();
    let title = pr_title(&set);
    let body = PromptEngine::new().render_pr_body(&set, &rows)?;
    let remote_url = vcs.remote_url()?;
    let host = remote_url
        .as_deref()
        .map_or(RemoteHost::Other, RemoteHost::from_url);

    let reason = match create(&paths.root, host, &title, &body) {
        PrCreation::Created { url } => {
            info!(%url, "pull request created");
            state.pr_url = Some(url.clone());
            write_run_state(&paths.state_path, &state)?;
            return Ok(PrReport {
                outcome: PrOutcome::Created { url },
                warnings,
            });
        }
        PrCreation::Failed { message } => message,
        PrCreation::Unsupported => match &remote_url {
            Some(_) => "no PR command-line tool is known for this remote".to_string(),
            None => "no origin remote is configured".to_string(),
        },
    };
    Ok(PrReport {
        outcome: PrOutcome::Manual {
            reason,
            remote_url,
            title,
            body,
        },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::item_store::write_item_set;
    use crate::io::run_state::{Checkpoint, NewRun, RunState};
    use crate::test_support::{FakeVcs, item, item_set};
    use chrono::Utc;
    use std::path::PathBuf;

    fn setup(done: bool) -> (tempfile::TempDir, RalphPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RalphPaths::new(temp.path());
        let set = item_set(vec![item(1, 1, true), item(2, 2, done)]);
        write_item_set(&paths.root.join("prd.json"), &set).expect("write prd");
        let mut state = RunState::new(
            NewRun {
                branch: "ralph/demo".to_string(),
                base_branch: "main".to_string(),
                prd_path: PathBuf::from("prd.json"),
                agent: "claude".to_string(),
                model: None,
                auto_push: false,
                watchdog_timeout: 0,
            },
            Utc::now(),
        );
        state.add_checkpoint(Checkpoint {
            item_id: 1,
            commit_sha: "deadbeef00".to_string(),
            timestamp: Utc::now(),
            files_changed: Vec::new(),
            tests_passed: true,
            route: String::new(),
        });
        write_run_state(&paths.state_path, &state).expect("write state");
        (temp, paths)
    }

    #[test]
    fn refuses_incomplete_run_without_force() {
        let (_temp, paths) = setup(false);
        let vcs = FakeVcs::with_shas(&[]);
        let err = open_pull_request(&paths, &vcs, false, |_, _, _, _| PrCreation::Unsupported)
            .unwrap_err();
        assert!(err.to_string().contains("1 item(s) still incomplete"));
        assert!(vcs.calls().is_empty());
    }

    /// Verifies a created PR is pushed first and its URL persisted.
    #[test]
    fn created_pr_url_is_saved() {
        let (_temp, paths) = setup(true);
        let vcs = FakeVcs::with_shas(&[]);
        vcs.set_remote("git@github.com:org/demo.git");
        let mut seen = None;
        let report = open_pull_request(&paths, &vcs, false, |_, host, title, body| {
            seen = Some((host, title.to_string(), body.to_string()));
            PrCreation::Created {
                url: "https://github.com/org/demo/pull/7".to_string(),
            }
        })
        .expect("pr");

        assert_eq!(
            report.outcome,
            PrOutcome::Created {
                url: "https://github.com/org/demo/pull/7".to_string()
            }
        );
        assert_eq!(vcs.calls(), vec!["push -u ralph/demo".to_string()]);
        let (host, title, body) = seen.expect("create called");
        assert_eq!(host, RemoteHost::GitHub);
        assert_eq!(title, "[Ralph] Demo");
        assert!(body.contains("| Item 1 | `deadbeef` |"));
        let state = load_run_state(&paths.state_path).expect("state");
        assert_eq!(state.pr_url.as_deref(), Some("https://github.com/org/demo/pull/7"));
    }

    #[test]
    fn unsupported_remote_falls_back_to_manual_body() {
        let (_temp, paths) = setup(false);
        let vcs = FakeVcs::with_shas(&[]);
        vcs.fail_push();
        let report =
            open_pull_request(&paths, &vcs, true, |_, _, _, _| PrCreation::Unsupported).expect("pr");

        assert_eq!(report.warnings.len(), 1);
        match report.outcome {
            PrOutcome::Manual {
                reason,
                remote_url,
                body,
                ..
            } => {
                assert_eq!(reason, "no origin remote is configured");
                assert_eq!(remote_url, None);
                assert!(body.contains("Items Completed (1/2)"));
            }
            other => panic!("expected manual outcome, got {other:?}"),
        }
        let state = load_run_state(&paths.state_path).expect("state");
        assert_eq!(state.pr_url, None);
    }
}
