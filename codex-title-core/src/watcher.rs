//! The background loop that turns a session log into tab titles.
//!
//! ```text
//! LOCATING ──▶ TAILING ──▶ STOPPED
//!                ▲   │
//!                └───┘ handover
//! ```
//!
//! [`Watcher::run`] resolves the log (or takes the one given), paints an
//! initial title from the log's existing content, then follows new events
//! through the turn machine. When the switch monitor finds that the session
//! moved to another log, tailing restarts there from its current end.
//!
//! The loop runs on its own thread and only shares two things with the
//! foreground: the [`TitleSink`] and the stop/done [`Flag`]s.

use crate::config::{Config, TitleConfig, WatchConfig};
use crate::history::{self, SessionHistory};
use crate::locator::{LocateRequest, Located, Locator, Provenance};
use crate::reader::{EventStream, StreamOptions, TailCursor, POLL_INTERVAL};
use crate::rollout;
use crate::switch::SwitchMonitor;
use crate::title::{Status, TitleSink};
use crate::turn::{self, Transition, TurnMachine};
use crate::vcs::{CommitCorrelator, GitRepo, Repository};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Sibling logs probed for an initial title when resuming.
pub const SIBLING_PROBE_LIMIT: usize = 5;

/// A one-way boolean shared across threads (stop requests, "a done title was shown").
#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run inputs of the watcher.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Explicit log path; skips locating.
    pub log: Option<PathBuf>,
    /// Day directory the session is expected to write into.
    pub session_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    /// The spawned agent, if any.
    pub pid: Option<u32>,
    /// The agent was started with `--resume` or `--last`.
    pub resume_hint: bool,
}

/// Derive a status from a log's existing content.
///
/// `None` means the log has nothing to show yet: no turn ever opened, or the
/// session was never confirmed by the history index and `allow_unseen` is off.
pub fn initial_status(
    path: &Path,
    allow_unseen: bool,
    history_log: &Path,
    watch: &WatchConfig,
    correlator: &CommitCorrelator,
    now: DateTime<Utc>,
) -> Option<Status> {
    let session_id = rollout::session_id(path);
    let history_seen = session_id
        .as_deref()
        .map_or(true, |id| history::contains_session(history_log, id, None));
    if session_id.is_some() && !history_seen && !allow_unseen {
        return None;
    }

    let state = match turn::collect_log_state(
        path,
        history_seen,
        &watch.oracle(),
        watch.idle_timeout(),
        now,
    ) {
        Ok(state) => state,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "log replay failed");
            return None;
        }
    };

    if state.pending_user {
        return Some(Status::Running);
    }
    if !state.seen_assistant {
        return None;
    }
    Some(correlator.judge(&state.verdict()))
}

/// Session orchestrator.
pub struct Watcher {
    titles: TitleConfig,
    watch: WatchConfig,
    locator: Locator,
    sink: Arc<dyn TitleSink>,
    repo: Option<Arc<dyn Repository>>,
    stop: Flag,
    done: Flag,
    max_wait: Option<Duration>,
}

impl Watcher {
    /// The git repository around the locator's cwd is discovered here when
    /// no-commit signalling is configured.
    pub fn new(config: &Config, locator: Locator, sink: Arc<dyn TitleSink>, stop: Flag, done: Flag) -> Self {
        let repo = if config.titles.signals_no_commit() {
            GitRepo::discover(locator.cwd()).map(|repo| Arc::new(repo) as Arc<dyn Repository>)
        } else {
            None
        };
        Self {
            titles: config.titles.clone(),
            watch: config.watch.clone(),
            locator,
            sink,
            repo,
            stop,
            done,
            max_wait: None,
        }
    }

    /// Replace the discovered repository.
    pub fn with_repository(mut self, repo: Option<Arc<dyn Repository>>) -> Self {
        self.repo = repo;
        self
    }

    /// Give up locating a log after `max_wait`.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Run on a dedicated thread.
    pub fn spawn(self, options: WatchOptions) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("codex-title-watch".to_string())
            .spawn(move || self.run(&options))
    }

    /// Locate, then tail until stopped.
    pub fn run(&self, options: &WatchOptions) {
        let allow_initial_resume = self.watch.follow_global_resume || options.resume_hint;
        let allow_external = self.watch.follow_global_resume;

        let located = match &options.log {
            Some(path) => Located::new(path.clone(), Provenance::Arg),
            None => {
                let request = LocateRequest {
                    session_dir: options.session_dir.clone(),
                    start_time: options.start_time,
                    pid: options.pid,
                    allow_external_switch: allow_initial_resume,
                    max_wait: self.max_wait,
                };
                match self.locator.resolve(&request, &self.stop) {
                    Some(located) => located,
                    None => {
                        tracing::info!("watcher:no_log_found");
                        return;
                    }
                }
            }
        };

        let mut current = located;
        while !self.stop.is_set() {
            let allow_unseen = allow_initial_resume || current.provenance.is_trusted();
            tracing::info!(
                path = %current.path.display(),
                source = current.provenance.as_str(),
                allow_unseen,
                "watcher:start"
            );
            let cursor = TailCursor::at_end(&current.path);
            self.paint_initial(&current.path, allow_unseen, options.resume_hint);

            match self.follow(&cursor, options, allow_external) {
                Some(next) if next != current.path => {
                    current = Located::new(next, Provenance::Handover);
                }
                _ => break,
            }
        }
        tracing::debug!("watcher:stopped");
    }

    fn paint_initial(&self, path: &Path, allow_unseen: bool, resume_hint: bool) {
        let correlator = CommitCorrelator::new(self.repo.clone(), self.titles.signals_no_commit());
        let history_log = self.locator.home().history_log();
        let now = self.locator.clock().now();
        let mut status = initial_status(path, allow_unseen, &history_log, &self.watch, &correlator, now);

        if status.is_none() && resume_hint {
            let siblings = path.parent().map(rollout::logs_by_mtime).unwrap_or_default();
            status = siblings
                .iter()
                .filter(|sibling| sibling.as_path() != path)
                .take(SIBLING_PROBE_LIMIT)
                .find_map(|sibling| {
                    initial_status(sibling, allow_unseen, &history_log, &self.watch, &correlator, now)
                });
        }

        if let Some(status) = status {
            tracing::info!(status = %status, "watcher:initial_title");
            self.paint(status);
        }
    }

    /// Tail one log until stopped or handed over. Returns the handover target.
    fn follow(&self, cursor: &TailCursor, options: &WatchOptions, allow_external: bool) -> Option<PathBuf> {
        let path = &cursor.path;
        let history_log = self.locator.home().history_log();
        let session_id = rollout::session_id(path);
        let history_seen = session_id
            .as_deref()
            .is_some_and(|id| history::contains_session(&history_log, id, None));
        let history = SessionHistory::new(history_log, session_id);

        let mut machine = TurnMachine::new(history_seen, self.watch.idle_timeout());
        let mut correlator = CommitCorrelator::new(self.repo.clone(), self.titles.signals_no_commit());
        let monitor = SwitchMonitor::new(
            self.locator.clone(),
            path.clone(),
            options.start_time,
            options.pid,
            allow_external,
        );
        let stream_options = StreamOptions {
            floor: cursor.offset.is_none().then_some(options.start_time),
            oracle: self.watch.oracle(),
            idle_interval: self.watch.idle_interval(),
            poll_interval: POLL_INTERVAL,
        };

        let mut stream = match EventStream::open(cursor, stream_options, self.stop.clone(), monitor) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "watcher:open_failed");
                return None;
            }
        };

        let mut running = false;
        while let Some(event) = stream.next() {
            if self.stop.is_set() {
                break;
            }
            if event.is_user_message() && turn::is_resume_command(event.user_text()) {
                stream.handover_mut().enable_external_switch();
            }
            match machine.apply(&event, &history, Instant::now()) {
                Some(Transition::TurnOpened) => {
                    correlator.snapshot_head();
                    running = true;
                    self.paint(Status::Running);
                }
                Some(Transition::StillRunning) if !running => {
                    running = true;
                    self.paint(Status::Running);
                }
                Some(Transition::TurnClosed(verdict)) => {
                    running = false;
                    self.paint(correlator.judge(&verdict));
                }
                Some(Transition::StillRunning) | None => {}
            }
        }

        stream.into_handover().take_next()
    }

    fn paint(&self, status: Status) {
        let title = status.title(&self.titles);
        tracing::info!(status = %status, title, "watcher:title");
        self.sink.set(title);
        if status.is_done() {
            self.done.set();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::CodexHome;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const META: &str = r#"{"type":"session_meta","payload":{"id":"abc","cwd":"/nowhere"}}"#;
    const USER: &str = r#"{"type":"event_msg","payload":{"type":"user_message","message":"hi"}}"#;
    const AGENT: &str = r#"{"type":"event_msg","payload":{"type":"agent_message","message":"ok"}}"#;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TitleSink for Recorder {
        fn set(&self, title: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    fn write_log(path: &Path, lines: &[&str]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("{}\n", lines.join("\n"))).unwrap();
    }

    #[test]
    fn test_initial_status_requires_confirmation_or_trust() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("rollout-a.jsonl");
        let history = tmp.path().join("history.jsonl");
        write_log(&log, &[META, USER, AGENT]);
        let watch = WatchConfig::default();
        let correlator = CommitCorrelator::new(None, true);
        let now = Utc::now();

        assert_eq!(initial_status(&log, false, &history, &watch, &correlator, now), None);
        assert_eq!(
            initial_status(&log, true, &history, &watch, &correlator, now),
            Some(Status::Done)
        );

        std::fs::write(&history, "{\"session_id\":\"abc\",\"ts\":1}\n").unwrap();
        assert_eq!(
            initial_status(&log, false, &history, &watch, &correlator, now),
            Some(Status::Done)
        );

        write_log(&log, &[META, USER]);
        assert_eq!(
            initial_status(&log, false, &history, &watch, &correlator, now),
            Some(Status::Running)
        );
    }

    #[test]
    fn test_resume_hint_probes_siblings() {
        let tmp = TempDir::new().unwrap();
        let home = CodexHome::with_root(tmp.path().join(".codex"));
        let day = home.sessions_root().join("2026/01/04");
        let fresh = day.join("rollout-2026-01-04T10-00-00-fresh.jsonl");
        let earlier = day.join("rollout-2026-01-04T09-00-00-earlier.jsonl");
        write_log(&earlier, &[META, USER, AGENT]);
        write_log(&fresh, &[META]);

        let config = Config::default();
        let locator = Locator::new(home, tmp.path().to_path_buf(), &config.watch);
        let sink = Arc::new(Recorder::default());
        let done = Flag::new();
        let watcher = Watcher::new(&config, locator, sink.clone(), Flag::new(), done.clone())
            .with_repository(None);

        watcher.paint_initial(&fresh, true, false);
        assert!(sink.0.lock().unwrap().is_empty());

        watcher.paint_initial(&fresh, true, true);
        assert_eq!(*sink.0.lock().unwrap(), vec![config.titles.done.clone()]);
        assert!(done.is_set());
    }

    #[test]
    fn test_flag_is_shared() {
        let flag = Flag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.set();
        assert!(other.is_set());
    }
}
