//! Optional project configuration stored in `ralph.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::definition::AgentKind;

/// Overrides the configured `session_url`.
pub const SESSION_URL_ENV: &str = "RALPH_SESSION_URL";

/// Ralph configuration (TOML).
///
/// Every field has a default so a missing file or a partial file both work.
/// CLI flags on `ralph start` take precedence; the resolved values are stored
/// in run state for `ralph resume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Agent used when `--agent` is not given.
    pub agent: String,

    /// Seconds of agent silence before the watchdog warns. `<= 0` disables it.
    pub watchdog_timeout_secs: i64,

    /// Wall-clock limit for each hook command.
    pub hook_timeout_secs: u64,

    /// Wall-clock limit for the test command.
    pub test_timeout_secs: u64,

    /// Explicit test command (argv). Empty means auto-detect.
    pub test_command: Vec<String>,

    /// External session URL for agents that support session routing.
    pub session_url: Option<String>,

    /// Default line count for `ralph log`.
    pub log_lines: usize,

    /// Prefix for run branches.
    pub branch_prefix: String,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            agent: "claude".to_string(),
            watchdog_timeout_secs: 600,
            hook_timeout_secs: 300,
            test_timeout_secs: 300,
            test_command: Vec::new(),
            session_url: None,
            log_lines: 20,
            branch_prefix: "ralph/".to_string(),
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        AgentKind::from_name(&self.agent)?;
        if self.hook_timeout_secs == 0 {
            return Err(anyhow!("hook_timeout_secs must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if !self.test_command.is_empty() && self.test_command[0].trim().is_empty() {
            return Err(anyhow!("test_command must start with a program name"));
        }
        if self.branch_prefix.contains(char::is_whitespace) {
            return Err(anyhow!("branch_prefix must not contain whitespace"));
        }
        Ok(())
    }

    /// Session URL from the environment, falling back to the config file.
    pub fn effective_session_url(&self) -> Option<String> {
        std::env::var(SESSION_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.session_url.clone())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(RalphConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RalphConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("ralph.toml")).expect("load");
        assert_eq!(cfg, RalphConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        fs::write(&path, "agent = \"codex\"\nwatchdog_timeout_secs = 0\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.agent, "codex");
        assert_eq!(cfg.watchdog_timeout_secs, 0);
        assert_eq!(cfg.hook_timeout_secs, 300);
        assert_eq!(cfg.branch_prefix, "ralph/");
    }

    #[test]
    fn rejects_unknown_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        fs::write(&path, "agent = \"cursor\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unknown agent 'cursor'"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        let cfg = RalphConfig {
            test_command: vec!["just".to_string(), "test".to_string()],
            session_url: Some("wss://sessions.example/abc".to_string()),
            ..RalphConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }
}
