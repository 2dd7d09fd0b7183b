//! Per-item run phases and the action labels persisted for each.
//!
//! The label is what `state.json` stores in `current_action`; it is written
//! before the phase's work begins so a crash or halt always leaves a record of
//! where the run stopped.

/// Which pipeline stage halted the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltKind {
    Agent,
    Tests,
    Hooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Assigned,
    Generating,
    Staging,
    Testing,
    PreCommitHooks,
    Checkpointing,
    PostItemHooks,
    Failed(HaltKind),
}

const ASSIGNED: &str = "Selecting next item...";
const GENERATING: &str = "Generating code...";
const STAGING: &str = "Staging changes...";
const TESTING: &str = "Running tests...";
const PRE_COMMIT: &str = "Running pre-commit hooks...";
const CHECKPOINTING: &str = "Creating checkpoint...";
const POST_ITEM: &str = "Running post-item hooks...";
const AGENT_FAILED: &str = "Agent failed - waiting for fix";
const TESTS_FAILED: &str = "Tests failed - waiting for fix";
const HOOKS_FAILED: &str = "Hooks failed - waiting for fix";

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "",
            Phase::Assigned => ASSIGNED,
            Phase::Generating => GENERATING,
            Phase::Staging => STAGING,
            Phase::Testing => TESTING,
            Phase::PreCommitHooks => PRE_COMMIT,
            Phase::Checkpointing => CHECKPOINTING,
            Phase::PostItemHooks => POST_ITEM,
            Phase::Failed(HaltKind::Agent) => AGENT_FAILED,
            Phase::Failed(HaltKind::Tests) => TESTS_FAILED,
            Phase::Failed(HaltKind::Hooks) => HOOKS_FAILED,
        }
    }

    /// Recover the phase from a persisted label. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let phase = match label {
            "" => Phase::Idle,
            ASSIGNED => Phase::Assigned,
            GENERATING => Phase::Generating,
            STAGING => Phase::Staging,
            TESTING => Phase::Testing,
            PRE_COMMIT => Phase::PreCommitHooks,
            CHECKPOINTING => Phase::Checkpointing,
            POST_ITEM => Phase::PostItemHooks,
            AGENT_FAILED => Phase::Failed(HaltKind::Agent),
            TESTS_FAILED => Phase::Failed(HaltKind::Tests),
            HOOKS_FAILED => Phase::Failed(HaltKind::Hooks),
            _ => return None,
        };
        Some(phase)
    }

    /// Short name for status output.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Assigned => "assigned",
            Phase::Generating => "generating",
            Phase::Staging => "staging",
            Phase::Testing => "testing",
            Phase::PreCommitHooks => "pre-commit hooks",
            Phase::Checkpointing => "checkpointing",
            Phase::PostItemHooks => "post-item hooks",
            Phase::Failed(HaltKind::Agent) => "failed (agent)",
            Phase::Failed(HaltKind::Tests) => "failed (tests)",
            Phase::Failed(HaltKind::Hooks) => "failed (hooks)",
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Phase::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 11] = [
        Phase::Idle,
        Phase::Assigned,
        Phase::Generating,
        Phase::Staging,
        Phase::Testing,
        Phase::PreCommitHooks,
        Phase::Checkpointing,
        Phase::PostItemHooks,
        Phase::Failed(HaltKind::Agent),
        Phase::Failed(HaltKind::Tests),
        Phase::Failed(HaltKind::Hooks),
    ];

    #[test]
    fn labels_map_back_to_phases() {
        for phase in ALL {
            assert_eq!(Phase::from_label(phase.label()), Some(phase));
        }
    }

    #[test]
    fn unknown_label_is_none() {
        assert_eq!(Phase::from_label("Doing something else"), None);
    }
}
