//! Locations inside the Codex data directory.
//!
//! ```text
//! ~/.codex/
//! ├── sessions/YYYY/MM/DD/rollout-<timestamp>-<session id>.jsonl
//! ├── log/codex-tui.log        (resume notices)
//! └── history.jsonl            (one line per submitted prompt)
//! ```

use chrono::{DateTime, Datelike, Local, Utc};
use std::path::{Path, PathBuf};

/// File name prefix of every session log.
pub const ROLLOUT_PREFIX: &str = "rollout-";
/// File extension of every session log.
pub const ROLLOUT_EXTENSION: &str = "jsonl";

/// Root of the agent's on-disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexHome {
    root: PathBuf,
}

impl CodexHome {
    /// `$CODEX_HOME` when set, otherwise `~/.codex`.
    pub fn discover() -> Self {
        match std::env::var_os("CODEX_HOME") {
            Some(root) if !root.is_empty() => Self::with_root(PathBuf::from(root)),
            _ => Self::with_root(crate::config::home_dir().join(".codex")),
        }
    }

    /// Use a custom root (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tree holding every session log.
    pub fn sessions_root(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Day directory a session started at `when` writes into (local calendar date).
    pub fn session_dir_for(&self, when: DateTime<Utc>) -> PathBuf {
        let local = when.with_timezone(&Local);
        self.sessions_root()
            .join(format!("{:04}", local.year()))
            .join(format!("{:02}", local.month()))
            .join(format!("{:02}", local.day()))
    }

    /// Companion TUI log carrying "Resumed rollout" notices.
    pub fn tui_log(&self) -> PathBuf {
        self.root.join("log").join("codex-tui.log")
    }

    /// Global prompt history index.
    pub fn history_log(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }
}

/// Whether `path` is named like a session log.
pub fn is_rollout_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(ROLLOUT_PREFIX) && path.extension().is_some_and(|ext| ext == ROLLOUT_EXTENSION)
}
