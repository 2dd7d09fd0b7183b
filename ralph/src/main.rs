//! Checkpointed agent runs over a PRD.
//!
//! `ralph start prd.json` creates a run branch and works through the PRD's
//! items one at a time: the agent implements an item, tests and hooks verify
//! it, and a commit checkpoints it. A halted run continues with
//! `ralph resume`; checkpoints can be undone with `ralph rollback`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};

use ralph::agents::definition::AgentKind;
use ralph::agents::executor::CliAgentExecutor;
use ralph::exit_codes;
use ralph::io::config::{RalphConfig, load_config};
use ralph::io::git::Git;
use ralph::io::paths::RalphPaths;
use ralph::io::pr_cli::create_pull_request;
use ralph::io::run_state::{RunState, clear_run};
use ralph::io::test_runner::DetectingTestRunner;
use ralph::log::{FOLLOW_POLL, follow_log, log_path, tail_lines};
use ralph::logging;
use ralph::pr::{PrOutcome, open_pull_request};
use ralph::report::ConsoleReporter;
use ralph::rollback::{RollbackMode, RollbackOutcome, reset_item, rollback};
use ralph::run_loop::{RunLoop, RunOutcome};
use ralph::start::{
    StartOptions, ensure_agent_available, loop_settings, prepare_resume, prepare_run,
};
use ralph::status::{diff_report, dry_run, status};

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Drive a coding agent through a PRD, one checkpointed item at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a run branch for a PRD and start working through its items.
    Start {
        /// Path to the PRD (JSON item set).
        prd: PathBuf,
        /// Agent to run: claude, codex, or gemini.
        #[arg(short, long)]
        agent: Option<String>,
        /// Model passed to the agent.
        #[arg(short, long)]
        model: Option<String>,
        /// Push after every checkpoint.
        #[arg(long)]
        push: bool,
        /// Start even if the working tree has uncommitted changes.
        #[arg(long)]
        force: bool,
        /// Seconds of agent silence before warning (0 disables).
        #[arg(long)]
        watchdog_timeout: Option<i64>,
        /// Echo agent output and info-level diagnostics.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Continue the active run after a halt or interruption.
    Resume {
        /// Echo agent output and info-level diagnostics.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show progress of the active run.
    Status,
    /// Undo the most recent checkpoints.
    Rollback {
        /// Number of checkpoints to undo.
        #[arg(default_value_t = 1)]
        count: usize,
        /// Reset instead of reverting (discards the commits).
        #[arg(long)]
        hard: bool,
    },
    /// Undo the checkpoint of one item.
    ResetItem {
        id: u32,
        /// Reset instead of reverting (also discards later checkpoints).
        #[arg(long)]
        hard: bool,
        /// Retry this item first on resume.
        #[arg(long)]
        current: bool,
    },
    /// Summarize changes on the run branch.
    Diff,
    /// Show what a run would do without changing anything.
    DryRun {
        /// PRD to inspect (defaults to the active run's PRD).
        prd: Option<PathBuf>,
    },
    /// Push the run branch and open a pull request.
    Pr {
        /// Open the PR even if items remain.
        #[arg(long)]
        force: bool,
    },
    /// Show the agent transcript.
    Log {
        /// Number of lines.
        #[arg(short = 'n', long)]
        lines: Option<usize>,
        /// Keep printing new output.
        #[arg(short, long)]
        follow: bool,
    },
    /// Delete run state, ending the active run.
    Clear,
}

impl Command {
    fn verbose(&self) -> bool {
        matches!(
            self,
            Command::Start { verbose: true, .. } | Command::Resume { verbose: true }
        )
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.command.verbose());
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve working directory")?;
    let paths = RalphPaths::new(root);
    match cli.command {
        Command::Start {
            prd,
            agent,
            model,
            push,
            force,
            watchdog_timeout,
            verbose,
        } => {
            let opts = StartOptions {
                prd_path: prd,
                agent,
                model,
                push,
                force,
                watchdog_timeout,
            };
            cmd_start(&paths, &opts, verbose)
        }
        Command::Resume { verbose } => cmd_resume(&paths, verbose),
        Command::Status => Ok(cmd_status(&paths)),
        Command::Rollback { count, hard } => cmd_rollback(&paths, count, hard),
        Command::ResetItem { id, hard, current } => cmd_reset_item(&paths, id, hard, current),
        Command::Diff => cmd_diff(&paths),
        Command::DryRun { prd } => cmd_dry_run(&paths, prd.as_deref()),
        Command::Pr { force } => cmd_pr(&paths, force),
        Command::Log { lines, follow } => cmd_log(&paths, lines, follow),
        Command::Clear => cmd_clear(&paths),
    }
}

fn cmd_start(paths: &RalphPaths, opts: &StartOptions, verbose: bool) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let agent = AgentKind::from_name(opts.agent.as_deref().unwrap_or(&config.agent))?;
    ensure_agent_available(agent)?;
    let git = Git::new(&paths.root);
    let started = prepare_run(paths, &config, opts, &git, Local::now())?;
    println!(
        "Started run on {} ({} item(s), agent {agent})",
        started.state.branch,
        started.items.total_count()
    );
    if started.is_complete() {
        println!("Every item already passes; nothing to do.");
        return Ok(exit_codes::OK);
    }
    drive(paths, &config, &git, &started.state, verbose)
}

fn cmd_resume(paths: &RalphPaths, verbose: bool) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let git = Git::new(&paths.root);
    let state = prepare_resume(paths, &git)?;
    println!("Resuming run on {}", state.branch);
    drive(paths, &config, &git, &state, verbose)
}

fn drive(paths: &RalphPaths, config: &RalphConfig, git: &Git, state: &RunState, verbose: bool) -> Result<i32> {
    let agent = AgentKind::from_name(&state.agent)?;
    ensure_agent_available(agent)?;
    let settings = loop_settings(config, agent);
    let executor = CliAgentExecutor::new(agent);
    let tests = DetectingTestRunner::new(
        config.test_command.clone(),
        Duration::from_secs(config.test_timeout_secs),
    );
    let mut reporter = ConsoleReporter { verbose };
    let outcome = RunLoop {
        paths,
        settings: &settings,
        vcs: git,
        agent: &executor,
        tests: &tests,
        reporter: &mut reporter,
    }
    .run()?;
    match outcome {
        RunOutcome::Complete { completed, total } => {
            println!();
            println!("All items complete ({completed}/{total}). Open a PR with `ralph pr`.");
            Ok(exit_codes::OK)
        }
        RunOutcome::Halted { .. } => Ok(exit_codes::HALTED),
    }
}

fn cmd_status(paths: &RalphPaths) -> i32 {
    let git = Git::new(&paths.root);
    match status(paths, &git, Utc::now()) {
        Ok(Some(report)) => print!("{report}"),
        Ok(None) => println!("No active run. Start one with `ralph start <prd>`."),
        Err(err) => println!("Run state could not be read: {err:#}"),
    }
    exit_codes::OK
}

fn cmd_rollback(paths: &RalphPaths, count: usize, hard: bool) -> Result<i32> {
    let git = Git::new(&paths.root);
    let outcome = rollback(paths, &git, count, RollbackMode::from_hard(hard))?;
    if outcome.undone.is_empty() {
        println!("No checkpoints to roll back.");
    } else {
        print_undone(&outcome, hard);
    }
    Ok(exit_codes::OK)
}

fn cmd_reset_item(paths: &RalphPaths, id: u32, hard: bool, current: bool) -> Result<i32> {
    let git = Git::new(&paths.root);
    let outcome = reset_item(paths, &git, id, RollbackMode::from_hard(hard), current)?;
    print_undone(&outcome, hard);
    if current {
        println!("Item {id} will be retried first on `ralph resume`.");
    }
    Ok(exit_codes::OK)
}

fn print_undone(outcome: &RollbackOutcome, hard: bool) {
    let verb = if hard { "Reset" } else { "Reverted" };
    for checkpoint in &outcome.undone {
        let short: String = checkpoint.commit_sha.chars().take(8).collect();
        println!("{verb} item {} ({short})", checkpoint.item_id);
    }
}

fn cmd_diff(paths: &RalphPaths) -> Result<i32> {
    let git = Git::new(&paths.root);
    print!("{}", diff_report(paths, &git)?);
    Ok(exit_codes::OK)
}

fn cmd_dry_run(paths: &RalphPaths, prd: Option<&Path>) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    print!("{}", dry_run(paths, &config, prd, Local::now())?);
    Ok(exit_codes::OK)
}

fn cmd_pr(paths: &RalphPaths, force: bool) -> Result<i32> {
    let git = Git::new(&paths.root);
    let report = open_pull_request(paths, &git, force, create_pull_request)?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    match report.outcome {
        PrOutcome::Created { url } => println!("Pull request: {url}"),
        PrOutcome::Manual {
            reason,
            remote_url,
            title,
            body,
        } => {
            println!("Could not open a pull request automatically: {reason}");
            if let Some(url) = remote_url {
                println!("Remote: {url}");
            }
            println!();
            println!("Title: {title}");
            println!();
            println!("{body}");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_log(paths: &RalphPaths, lines: Option<usize>, follow: bool) -> Result<i32> {
    let path = log_path(paths)?;
    let lines = match lines {
        Some(n) => n,
        None => load_config(&paths.config_path)?.log_lines,
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in tail_lines(path, lines)? {
        writeln!(out, "{line}")?;
    }
    if follow {
        follow_log(path, &mut out, FOLLOW_POLL, || true)?;
    }
    Ok(exit_codes::OK)
}

fn cmd_clear(paths: &RalphPaths) -> Result<i32> {
    if clear_run(paths)? {
        println!("Cleared run state in {}.", paths.run_dir.display());
    } else {
        println!("No run to clear.");
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_with_flags() {
        let cli = Cli::parse_from([
            "ralph",
            "start",
            "prd.json",
            "-a",
            "codex",
            "--model",
            "o3",
            "--push",
            "--watchdog-timeout",
            "0",
        ]);
        match cli.command {
            Command::Start {
                prd,
                agent,
                model,
                push,
                force,
                watchdog_timeout,
                verbose,
            } => {
                assert_eq!(prd, PathBuf::from("prd.json"));
                assert_eq!(agent.as_deref(), Some("codex"));
                assert_eq!(model.as_deref(), Some("o3"));
                assert!(push);
                assert!(!force);
                assert_eq!(watchdog_timeout, Some(0));
                assert!(!verbose);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn parse_rollback_defaults_to_one() {
        let cli = Cli::parse_from(["ralph", "rollback"]);
        assert!(matches!(cli.command, Command::Rollback { count: 1, hard: false }));
        let cli = Cli::parse_from(["ralph", "rollback", "3", "--hard"]);
        assert!(matches!(cli.command, Command::Rollback { count: 3, hard: true }));
    }

    #[test]
    fn parse_reset_item_and_log() {
        let cli = Cli::parse_from(["ralph", "reset-item", "4", "--hard", "--current"]);
        assert!(matches!(
            cli.command,
            Command::ResetItem {
                id: 4,
                hard: true,
                current: true
            }
        ));
        let cli = Cli::parse_from(["ralph", "log", "-n", "50", "-f"]);
        assert!(matches!(
            cli.command,
            Command::Log {
                lines: Some(50),
                follow: true
            }
        ));
    }

    #[test]
    fn parse_dry_run_prd_is_optional() {
        let cli = Cli::parse_from(["ralph", "dry-run"]);
        assert!(matches!(cli.command, Command::DryRun { prd: None }));
    }

    #[test]
    fn verbose_only_on_run_commands() {
        assert!(Cli::parse_from(["ralph", "resume", "-v"]).command.verbose());
        assert!(!Cli::parse_from(["ralph", "resume"]).command.verbose());
        assert!(!Cli::parse_from(["ralph", "status"]).command.verbose());
    }
}
