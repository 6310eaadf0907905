//! One-shot status query (`codex-title --status`).
//!
//! Resolves the most likely log for the current directory without waiting,
//! derives its title from the existing content and renders a small report.

use crate::config::Config;
use crate::locator::{Located, Locator, Provenance};
use crate::rollout;
use crate::title::Status;
use crate::vcs::{CommitCorrelator, GitRepo, Repository};
use crate::watcher;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What `--status` prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub title: String,
    pub status: Option<Status>,
    pub log_path: Option<PathBuf>,
    pub source: Option<&'static str>,
    pub session_id: Option<String>,
}

impl StatusReport {
    /// Query the log `locator` would pick for `session_dir`, or `log` when given.
    pub fn query(
        config: &Config,
        locator: &Locator,
        session_dir: &Path,
        log: Option<&Path>,
        repo: Option<Arc<dyn Repository>>,
    ) -> Self {
        let located = match log {
            Some(path) => Some(Located::new(path.to_path_buf(), Provenance::Arg)),
            None => locator.status_log_path(session_dir),
        };
        let Some(located) = located else {
            return Self {
                title: config.titles.new.clone(),
                status: None,
                log_path: None,
                source: None,
                session_id: None,
            };
        };

        let correlator = CommitCorrelator::new(repo, config.titles.signals_no_commit());
        let status = watcher::initial_status(
            &located.path,
            true,
            &locator.home().history_log(),
            &config.watch,
            &correlator,
            locator.clock().now(),
        );
        let title = status
            .map(|status| status.title(&config.titles).to_string())
            .unwrap_or_else(|| config.titles.new.clone());

        Self {
            title,
            status,
            session_id: rollout::session_id(&located.path),
            source: Some(located.provenance.as_str()),
            log_path: Some(located.path),
        }
    }

    /// Like [`query`](Self::query), with the repository discovered from the locator's cwd.
    pub fn for_cwd(config: &Config, locator: &Locator, session_dir: &Path, log: Option<&Path>) -> Self {
        let repo = if config.titles.signals_no_commit() {
            GitRepo::discover(locator.cwd()).map(|repo| Arc::new(repo) as Arc<dyn Repository>)
        } else {
            None
        };
        Self::query(config, locator, session_dir, log, repo)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "title: {}", self.title)?;
        if let Some(path) = &self.log_path {
            writeln!(f, "log_path: {}", path.display())?;
        }
        if let Some(source) = self.source {
            writeln!(f, "source: {source}")?;
        }
        if let Some(id) = &self.session_id {
            writeln!(f, "session_id: {id}")?;
        }
        Ok(())
    }
}
