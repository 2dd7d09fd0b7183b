//! Supported agent CLIs and their argument conventions.

use std::fmt;
use std::path::PathBuf;

use crate::error::RalphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
}

/// How the task text reaches the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPassing {
    /// As the value of a named flag, e.g. `-p <task>`.
    Flag(&'static str),
    /// As the final positional argument.
    Positional,
}

/// Static description of one agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSpec {
    pub display_name: &'static str,
    pub command: &'static str,
    pub fixed_args: &'static [&'static str],
    pub prompt: PromptPassing,
    pub model_flag: &'static str,
    /// Flag that routes the agent through an external session, if supported.
    pub session_flag: Option<&'static str>,
}

/// A ready-to-spawn argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

const CLAUDE: AgentSpec = AgentSpec {
    display_name: "Claude Code",
    command: "claude",
    fixed_args: &["--dangerously-skip-permissions"],
    prompt: PromptPassing::Flag("-p"),
    model_flag: "--model",
    session_flag: Some("--sdk-url"),
};

const CODEX: AgentSpec = AgentSpec {
    display_name: "Codex CLI",
    command: "codex",
    fixed_args: &["exec", "--yolo"],
    prompt: PromptPassing::Positional,
    model_flag: "--model",
    session_flag: None,
};

const GEMINI: AgentSpec = AgentSpec {
    display_name: "Gemini CLI",
    command: "gemini",
    fixed_args: &[],
    prompt: PromptPassing::Flag("-p"),
    model_flag: "--model",
    session_flag: None,
};

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Claude, AgentKind::Codex, AgentKind::Gemini];

    pub fn from_name(name: &str) -> Result<Self, RalphError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            "gemini" => Ok(AgentKind::Gemini),
            _ => Err(RalphError::UnknownAgent {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
        }
    }

    pub fn spec(self) -> &'static AgentSpec {
        match self {
            AgentKind::Claude => &CLAUDE,
            AgentKind::Codex => &CODEX,
            AgentKind::Gemini => &GEMINI,
        }
    }

    /// Locate the agent executable on `PATH`.
    pub fn locate(self) -> Result<PathBuf, RalphError> {
        let command = self.spec().command;
        which::which(command).map_err(|_| RalphError::AgentNotFound {
            command: command.to_string(),
        })
    }

    /// Agents installed on this machine, in preference order.
    pub fn available() -> Vec<AgentKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| kind.locate().is_ok())
            .collect()
    }

    /// Base command, fixed args, session route, model, then the task.
    pub fn build_command(
        self,
        task: &str,
        model: Option<&str>,
        session_url: Option<&str>,
    ) -> AgentCommand {
        let spec = self.spec();
        let mut args: Vec<String> = spec.fixed_args.iter().map(|a| a.to_string()).collect();
        if let (Some(flag), Some(url)) = (spec.session_flag, session_url) {
            args.push(flag.to_string());
            args.push(url.to_string());
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            args.push(spec.model_flag.to_string());
            args.push(model.to_string());
        }
        match spec.prompt {
            PromptPassing::Flag(flag) => {
                args.push(flag.to_string());
                args.push(task.to_string());
            }
            PromptPassing::Positional => args.push(task.to_string()),
        }
        AgentCommand {
            program: spec.command.to_string(),
            args,
        }
    }

    /// Whether `build_command` would use `session_url`.
    pub fn supports_sessions(self) -> bool {
        self.spec().session_flag.is_some()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_passes_prompt_by_flag_after_model_and_session() {
        let cmd = AgentKind::Claude.build_command("do it", Some("opus"), Some("wss://s/1"));
        assert_eq!(cmd.program, "claude");
        assert_eq!(
            cmd.args,
            vec![
                "--dangerously-skip-permissions",
                "--sdk-url",
                "wss://s/1",
                "--model",
                "opus",
                "-p",
                "do it"
            ]
        );
    }

    #[test]
    fn codex_passes_prompt_positionally_and_ignores_sessions() {
        let cmd = AgentKind::Codex.build_command("do it", None, Some("wss://s/1"));
        assert_eq!(cmd.args, vec!["exec", "--yolo", "do it"]);
    }

    #[test]
    fn gemini_omits_blank_model() {
        let cmd = AgentKind::Gemini.build_command("do it", Some("  "), None);
        assert_eq!(cmd.args, vec!["-p", "do it"]);
    }

    #[test]
    fn names_round_trip_and_unknown_is_error() {
        for kind in AgentKind::ALL {
            assert_eq!(AgentKind::from_name(kind.name()), Ok(kind));
        }
        assert_eq!(AgentKind::from_name("Claude"), Ok(AgentKind::Claude));
        assert_eq!(
            AgentKind::from_name("aider"),
            Err(RalphError::UnknownAgent {
                name: "aider".to_string()
            })
        );
    }
}
