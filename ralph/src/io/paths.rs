//! Canonical locations of run bookkeeping under a working root.

use std::path::{Path, PathBuf};

pub const RUN_DIR: &str = ".ralph";
pub const CONFIG_FILE: &str = "ralph.toml";

/// All paths ralph reads or writes for a project root.
#[derive(Debug, Clone)]
pub struct RalphPaths {
    pub root: PathBuf,
    pub run_dir: PathBuf,
    pub state_path: PathBuf,
    pub log_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl RalphPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let run_dir = root.join(RUN_DIR);
        Self {
            state_path: run_dir.join("state.json"),
            log_path: run_dir.join("current.log"),
            gitignore_path: root.join(".gitignore"),
            config_path: root.join(CONFIG_FILE),
            run_dir,
            root,
        }
    }

    /// Resolve a PRD path recorded relative to the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
