//! Deciding which session log belongs to this terminal.
//!
//! Several sessions may be writing logs under the same Codex home at once, and
//! the log of a freshly spawned agent does not exist yet when we start. The
//! [`Locator`] polls a handful of independent signals in a fixed priority
//! order until one of them names a file:
//!
//! | Signal | Provenance |
//! |---|---|
//! | files held open by the agent process (within the pid window) | `pid` |
//! | a new "Resumed rollout" notice in the TUI log | `tui-resume` |
//! | a new history-index entry for another session id | `history` |
//! | a new file in today's session directory | `session_dir` |
//! | the most recent log anywhere, after a grace period | `recent_any` |
//! | files held open by the agent process (after the pid window) | `pid` |
//!
//! The resume, history and `recent_any` signals only count when external
//! switching is allowed, because they can just as well belong to another tab.

use crate::clock::{chrono_duration, Clock, SystemClock};
use crate::config::WatchConfig;
use crate::history::{self, HistoryTail};
use crate::paths::CodexHome;
use crate::pid::{PidProbe, ProcessInspector};
use crate::resume_log::{self, ResumeNotice};
use crate::rollout;
use crate::timestamp::TimestampOracle;
use crate::watcher::Flag;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Pause between scans while waiting for a log.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(200);
/// Minimum spacing of process inspections.
pub const PID_CHECK_INTERVAL: Duration = Duration::from_millis(400);
/// Minimum spacing of whole-tree scans.
pub const RECENT_CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// How long to wait before considering logs outside today's directory.
pub const FALLBACK_AFTER: Duration = Duration::from_secs(2);
/// Grace window for files created just before we started.
pub const START_GRACE: Duration = Duration::from_secs(1);

/// How a log was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Given explicitly on the command line.
    Arg,
    Pid,
    TuiResume,
    History,
    SessionDir,
    RecentAny,
    /// Followed from a previous log after the session moved.
    Handover,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Arg => "arg",
            Provenance::Pid => "pid",
            Provenance::TuiResume => "tui-resume",
            Provenance::History => "history",
            Provenance::SessionDir => "session_dir",
            Provenance::RecentAny => "recent_any",
            Provenance::Handover => "handover",
        }
    }

    /// Sources that identify this session specifically rather than by proximity.
    pub fn is_trusted(self) -> bool {
        matches!(
            self,
            Provenance::Arg
                | Provenance::Pid
                | Provenance::TuiResume
                | Provenance::History
                | Provenance::Handover
        )
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved log and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub provenance: Provenance,
}

impl Located {
    pub fn new(path: PathBuf, provenance: Provenance) -> Self {
        Self { path, provenance }
    }
}

/// Inputs of one [`Locator::resolve`] call.
#[derive(Debug, Clone)]
pub struct LocateRequest {
    /// Day directory the new session is expected to write into.
    pub session_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    /// The agent process, when we spawned it.
    pub pid: Option<u32>,
    pub allow_external_switch: bool,
    /// Give up after this long; `None` waits until stopped.
    pub max_wait: Option<Duration>,
}

/// Finds session logs under one Codex home for one working directory.
#[derive(Clone)]
pub struct Locator {
    home: CodexHome,
    cwd: PathBuf,
    oracle: TimestampOracle,
    pid_timeout: Duration,
    pid_probe: Arc<dyn PidProbe>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("home", &self.home)
            .field("cwd", &self.cwd)
            .field("oracle", &self.oracle)
            .field("pid_timeout", &self.pid_timeout)
            .finish_non_exhaustive()
    }
}

impl Locator {
    pub fn new(home: CodexHome, cwd: PathBuf, watch: &WatchConfig) -> Self {
        Self {
            home,
            cwd,
            oracle: watch.oracle(),
            pid_timeout: watch.pid_log_timeout(),
            pid_probe: Arc::new(ProcessInspector),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_pid_probe(mut self, probe: Arc<dyn PidProbe>) -> Self {
        self.pid_probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn home(&self) -> &CodexHome {
        &self.home
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn oracle(&self) -> &TimestampOracle {
        &self.oracle
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn pid_timeout(&self) -> Duration {
        self.pid_timeout
    }

    /// Session log currently held open by `pid`.
    pub fn log_for_pid(&self, pid: u32) -> Option<PathBuf> {
        self.pid_probe.log_for_pid(pid)
    }

    /// Wait for the log of the session started at `request.start_time`.
    ///
    /// Returns `None` when stopped or when `max_wait` runs out.
    pub fn resolve(&self, request: &LocateRequest, stop: &Flag) -> Option<Located> {
        let session_dir = &request.session_dir;
        let start = request.start_time;
        let floor = start - chrono_duration(START_GRACE);
        let allow_external = request.allow_external_switch;

        let existing: HashSet<PathBuf> = rollout::logs_in(session_dir)
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        let mut history_tail = HistoryTail::at_end(self.home.history_log());
        let mut tui_mtime_seen: Option<DateTime<Utc>> = None;
        let mut pid_checked: Option<DateTime<Utc>> = None;
        let mut recent_checked: Option<DateTime<Utc>> = None;
        let started = self.clock.now();

        tracing::debug!(
            session_dir = %session_dir.display(),
            pid = ?request.pid,
            allow_external,
            "locate:start"
        );

        while !stop.is_set() {
            let now = self.clock.now();
            let elapsed = (now - started).to_std().unwrap_or(Duration::ZERO);
            if request.max_wait.is_some_and(|max| elapsed >= max) {
                tracing::debug!("locate:timeout");
                return None;
            }

            let pid_due = request.pid.is_some()
                && !self.pid_timeout.is_zero()
                && due(pid_checked, now, PID_CHECK_INTERVAL);
            let within_pid_window = elapsed <= self.pid_timeout;

            if pid_due && within_pid_window {
                pid_checked = Some(now);
                if let Some(found) = self.check_pid(request.pid) {
                    return Some(found);
                }
            }

            if allow_external {
                let tui_mtime = rollout::modified(&self.home.tui_log());
                if tui_mtime.is_some() && tui_mtime > tui_mtime_seen {
                    tui_mtime_seen = tui_mtime;
                    let admitted = |notice: &ResumeNotice| self.oracle.admits(notice.at, Some(floor));
                    if let Some(path) =
                        resume_log::resumed_log_where(&self.home.tui_log(), &self.cwd, admitted)
                    {
                        return Some(self.found(path, Provenance::TuiResume));
                    }
                }

                if let Some(path) = self.history_candidate(&mut history_tail, floor, None) {
                    return Some(self.found(path, Provenance::History));
                }
            }

            if let Some(path) = self.scan_session_dir(session_dir, &existing, start, allow_external) {
                return Some(self.found(path, Provenance::SessionDir));
            }

            if allow_external && elapsed >= FALLBACK_AFTER && due(recent_checked, now, RECENT_CHECK_INTERVAL) {
                recent_checked = Some(now);
                if let Some(path) = self.recent_any(floor) {
                    return Some(self.found(path, Provenance::RecentAny));
                }
            }

            if pid_due && !within_pid_window {
                pid_checked = Some(now);
                if let Some(found) = self.check_pid(request.pid) {
                    return Some(found);
                }
            }

            self.clock.sleep(SCAN_INTERVAL);
        }
        tracing::debug!("locate:stopped");
        None
    }

    fn check_pid(&self, pid: Option<u32>) -> Option<Located> {
        let path = self.pid_probe.log_for_pid(pid?)?;
        Some(self.found(path, Provenance::Pid))
    }

    fn found(&self, path: PathBuf, provenance: Provenance) -> Located {
        tracing::info!(
            path = %path.display(),
            source = provenance.as_str(),
            "locate:found"
        );
        Located::new(path, provenance)
    }

    /// First new history entry naming a session other than `skip_session`
    /// whose log can be found. Entries with trustworthy timestamps before
    /// `floor` are ignored.
    pub(crate) fn history_candidate(
        &self,
        tail: &mut HistoryTail,
        floor: DateTime<Utc>,
        skip_session: Option<&str>,
    ) -> Option<PathBuf> {
        for entry in tail.read_new() {
            if let Some(ts) = entry.ts {
                if self.oracle.trustworthy(ts, floor) && ts < floor {
                    continue;
                }
            }
            let Some(session_id) = entry.session_id else {
                continue;
            };
            if skip_session == Some(session_id.as_str()) {
                continue;
            }
            if let Some(path) = self.find_by_session_id(&session_id) {
                tracing::debug!(session_id = %session_id, path = %path.display(), "resume:history");
                return Some(path);
            }
        }
        None
    }

    fn scan_session_dir(
        &self,
        session_dir: &Path,
        existing: &HashSet<PathBuf>,
        start: DateTime<Utc>,
        allow_external: bool,
    ) -> Option<PathBuf> {
        let grace_floor = start - chrono_duration(START_GRACE);
        let candidates: Vec<(DateTime<Utc>, PathBuf)> = rollout::logs_in(session_dir)
            .into_iter()
            .filter(|(mtime, path)| {
                if existing.contains(path) {
                    allow_external && *mtime >= start
                } else {
                    *mtime >= grace_floor
                }
            })
            .collect();
        self.best_candidate(&candidates, start)
    }

    /// Rank candidates: cwd match first, then closeness of the recorded
    /// start time to `start_time`, then most recently modified.
    ///
    /// A recorded start time outside the skew tolerance is ignored in favor
    /// of the file's modification time.
    pub fn best_candidate(
        &self,
        candidates: &[(DateTime<Utc>, PathBuf)],
        start_time: DateTime<Utc>,
    ) -> Option<PathBuf> {
        candidates
            .iter()
            .min_by_key(|(mtime, path)| {
                let meta_ts = rollout::meta_timestamp(path)
                    .filter(|ts| self.oracle.trustworthy(*ts, start_time));
                let distance = (meta_ts.unwrap_or(*mtime) - start_time).abs();
                let cwd_mismatch = !rollout::matches_cwd(path, &self.cwd);
                (cwd_mismatch, distance, Reverse(*mtime))
            })
            .map(|(_, path)| path.clone())
    }

    /// Log named after `session_id`, preferring the newest one recorded in our cwd.
    pub fn find_by_session_id(&self, session_id: &str) -> Option<PathBuf> {
        let matches = rollout::logs_for_session(&self.home.sessions_root(), session_id);
        if matches.len() <= 1 {
            return matches.into_iter().next().map(|(_, path)| path);
        }
        self.newest_preferring_cwd(matches)
    }

    /// Newest log anywhere modified at or after `since`, preferring our cwd.
    pub fn recent_any(&self, since: DateTime<Utc>) -> Option<PathBuf> {
        let recent: Vec<_> = rollout::logs_under(&self.home.sessions_root())
            .into_iter()
            .filter(|(mtime, _)| *mtime >= since)
            .collect();
        self.newest_preferring_cwd(recent)
    }

    fn newest_preferring_cwd(&self, mut logs: Vec<(DateTime<Utc>, PathBuf)>) -> Option<PathBuf> {
        logs.sort_by(|a, b| b.0.cmp(&a.0));
        logs.iter()
            .find(|(_, path)| rollout::matches_cwd(path, &self.cwd))
            .or_else(|| logs.first())
            .map(|(_, path)| path.clone())
    }

    /// Best guess without waiting, for status queries: the latest resume
    /// notice, the latest prompted session, the newest log of the day, the
    /// newest log anywhere.
    pub fn status_log_path(&self, session_dir: &Path) -> Option<Located> {
        if let Some(path) = resume_log::resumed_log(&self.home.tui_log(), &self.cwd) {
            return Some(Located::new(path, Provenance::TuiResume));
        }
        if let Some(path) = history::latest_session_id(&self.home.history_log())
            .and_then(|id| self.find_by_session_id(&id))
        {
            return Some(Located::new(path, Provenance::History));
        }
        if let Some(path) = rollout::latest_in(session_dir) {
            return Some(Located::new(path, Provenance::SessionDir));
        }
        self.recent_any(DateTime::<Utc>::UNIX_EPOCH)
            .map(|path| Located::new(path, Provenance::RecentAny))
    }
}

fn due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    last.map_or(true, |last| now - last >= chrono_duration(interval))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_strings() {
        assert_eq!(Provenance::TuiResume.as_str(), "tui-resume");
        assert_eq!(Provenance::SessionDir.to_string(), "session_dir");
        assert!(Provenance::Arg.is_trusted());
        assert!(Provenance::History.is_trusted());
        assert!(!Provenance::SessionDir.is_trusted());
        assert!(!Provenance::RecentAny.is_trusted());
        assert_eq!(Provenance::Handover.as_str(), "handover");
        assert!(Provenance::Handover.is_trusted());
    }

    #[test]
    fn test_due() {
        let now = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(10);
        assert!(due(None, now, PID_CHECK_INTERVAL));
        assert!(!due(Some(now), now, PID_CHECK_INTERVAL));
        assert!(due(Some(now - chrono::Duration::milliseconds(400)), now, PID_CHECK_INTERVAL));
    }
}
