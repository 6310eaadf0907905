//! Commit correlation: did a finished turn leave a commit behind?
//!
//! The turn machine already knows about `git commit` tool calls that exited
//! 0. Commits made any other way (a hook, an editor, a script) are caught
//! here by asking git directly: either HEAD moved since the turn opened, or
//! `git log` finds a commit inside the turn's time window.
//!
//! Git failures never surface. A query that fails counts as "a commit
//! happened", so a broken repository shows the plain done title.

use crate::error::{Error, Result};
use crate::title::Status;
use crate::turn::TurnVerdict;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

/// The version-control queries the correlator needs.
pub trait Repository: Send + Sync {
    /// Current HEAD commit id, `None` for an unborn branch.
    fn head(&self) -> Result<Option<String>>;

    /// Whether any commit is dated within `[start, end]` (order-insensitive).
    fn has_commit_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool>;
}

/// A git work tree, queried through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// The repository containing `cwd`, if any.
    pub fn discover(cwd: &Path) -> Option<Self> {
        match run_git(cwd, &["rev-parse", "--show-toplevel"]) {
            Ok(Some(root)) => Some(Self {
                root: PathBuf::from(root),
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(cwd = %cwd.display(), error = %e, "no git repository");
                None
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Repository for GitRepo {
    fn head(&self) -> Result<Option<String>> {
        run_git(&self.root, &["rev-parse", "HEAD"])
    }

    fn has_commit_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let since = format!("--since={}", start.to_rfc3339_opts(SecondsFormat::Secs, true));
        let until = format!("--until={}", end.to_rfc3339_opts(SecondsFormat::Secs, true));
        let found = run_git(&self.root, &["log", "--format=%H", &since, &until, "-1"])?;
        Ok(found.is_some())
    }
}

/// Run `git -C <dir> <args>`, returning trimmed stdout (`None` when empty).
fn run_git(dir: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| Error::Vcs(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(Error::Vcs(format!(
            "git {} exited with {}",
            args.join(" "),
            output.status
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Turns a [`TurnVerdict`] into a done or done-no-commit status.
#[derive(Clone)]
pub struct CommitCorrelator {
    repo: Option<Arc<dyn Repository>>,
    signal_no_commit: bool,
    baseline_head: Option<String>,
}

impl std::fmt::Debug for CommitCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCorrelator")
            .field("has_repo", &self.repo.is_some())
            .field("signal_no_commit", &self.signal_no_commit)
            .field("baseline_head", &self.baseline_head)
            .finish()
    }
}

impl CommitCorrelator {
    /// `signal_no_commit` is false when no no-commit title is configured;
    /// every verdict is then plain done and git is never queried.
    pub fn new(repo: Option<Arc<dyn Repository>>, signal_no_commit: bool) -> Self {
        Self {
            repo: if signal_no_commit { repo } else { None },
            signal_no_commit,
            baseline_head: None,
        }
    }

    /// Record HEAD as the baseline of a turn that just opened.
    pub fn snapshot_head(&mut self) {
        self.baseline_head = self.repo.as_ref().and_then(|repo| match repo.head() {
            Ok(head) => head,
            Err(e) => {
                tracing::debug!(error = %e, "head snapshot failed");
                None
            }
        });
    }

    pub fn baseline_head(&self) -> Option<&str> {
        self.baseline_head.as_deref()
    }

    /// Final status of a closed turn.
    pub fn judge(&self, verdict: &TurnVerdict) -> Status {
        if verdict.commit_seen {
            return Status::Done;
        }
        let Some(repo) = self.repo.as_ref().filter(|_| self.signal_no_commit) else {
            return Status::Done;
        };
        match self.commit_landed(repo.as_ref(), verdict) {
            Ok(true) => Status::Done,
            Ok(false) => Status::DoneNoCommit,
            Err(e) => {
                tracing::debug!(error = %e, "commit correlation failed");
                Status::Done
            }
        }
    }

    fn commit_landed(&self, repo: &dyn Repository, verdict: &TurnVerdict) -> Result<bool> {
        let mut informed = false;
        if let Some(baseline) = &self.baseline_head {
            informed = true;
            if repo.head()?.as_deref() != Some(baseline.as_str()) {
                return Ok(true);
            }
        }
        if let (Some(opened), Some(closed)) = (verdict.opened_at, verdict.closed_at) {
            informed = true;
            if repo.has_commit_between(opened, closed)? {
                return Ok(true);
            }
        }
        // Nothing to compare against: stay optimistic.
        Ok(!informed)
    }
}
