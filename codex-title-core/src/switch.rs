//! Detecting that the session moved to another log while we tail one.
//!
//! Resuming a session (`codex resume`, `/resume`) makes the agent continue in
//! a different rollout file. The [`SwitchMonitor`] re-runs the cheap locator
//! signals between reads and, once one of them points elsewhere, records a
//! handover target that ends the current [`EventStream`](crate::reader::EventStream).
//!
//! The agent's own open files always win. The remaining signals only apply
//! when external switching is allowed:
//!
//! 1. a new resume notice in the TUI log,
//! 2. a new history entry for another session,
//! 3. the last path pinned by 1 or 2, if we drifted away from it,
//! 4. after a quiet spell, any more recently written log for our cwd.

use crate::clock::chrono_duration;
use crate::history::HistoryTail;
use crate::locator::{Locator, START_GRACE};
use crate::reader::HandoverProbe;
use crate::resume_log::ResumeTail;
use crate::rollout;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum spacing between checks.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// Quiet time before the recency fallback is tried.
pub const SWITCH_AFTER: Duration = Duration::from_secs(1);
/// A log must be at least this much newer than ours to win the recency fallback.
const RECENCY_MARGIN: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct SwitchMonitor {
    locator: Locator,
    log_path: PathBuf,
    session_id: Option<String>,
    start_time: DateTime<Utc>,
    pid: Option<u32>,
    allow_external_switch: bool,
    pinned: Option<PathBuf>,
    last_activity: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
    next: Option<PathBuf>,
    tui: ResumeTail,
    history: HistoryTail,
}

impl SwitchMonitor {
    /// Watch for handovers away from `log_path`.
    ///
    /// Only resume notices and history entries written after this call are
    /// considered.
    pub fn new(
        locator: Locator,
        log_path: PathBuf,
        start_time: DateTime<Utc>,
        pid: Option<u32>,
        allow_external_switch: bool,
    ) -> Self {
        let home = locator.home().clone();
        let now = locator.clock().now();
        Self {
            session_id: rollout::session_id(&log_path),
            tui: ResumeTail::at_end(home.tui_log()),
            history: HistoryTail::at_end(home.history_log()),
            locator,
            log_path,
            start_time,
            pid,
            allow_external_switch,
            pinned: None,
            last_activity: now,
            last_check: None,
            next: None,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pinned(&self) -> Option<&Path> {
        self.pinned.as_deref()
    }

    pub fn allows_external_switch(&self) -> bool {
        self.allow_external_switch
    }

    /// Follow external resume signals from now on.
    pub fn enable_external_switch(&mut self) {
        if !self.allow_external_switch {
            tracing::debug!(path = %self.log_path.display(), "switch:enabled");
        }
        self.allow_external_switch = true;
    }

    /// Handover target, if one was found.
    pub fn next_path(&self) -> Option<&Path> {
        self.next.as_deref()
    }

    /// Consume the handover target.
    pub fn take_next(&mut self) -> Option<PathBuf> {
        self.next.take()
    }

    /// Run one throttled check.
    pub fn check(&mut self) {
        if self.next.is_some() {
            return;
        }
        let now = self.locator.clock().now();
        if self
            .last_check
            .is_some_and(|last| now - last < chrono_duration(CHECK_INTERVAL))
        {
            return;
        }
        self.last_check = Some(now);

        if let Some(pid) = self.pid.filter(|_| self.within_pid_window(now)) {
            if let Some(path) = self.locator.log_for_pid(pid) {
                self.pin(path, "pid");
                return;
            }
        }

        if !self.allow_external_switch {
            return;
        }

        if let Some(path) = self.tui.next_target(self.locator.cwd()) {
            self.pin(path, "tui");
            return;
        }

        let floor = self.start_time - chrono_duration(START_GRACE);
        if let Some(path) =
            self.locator
                .history_candidate(&mut self.history, floor, self.session_id.as_deref())
        {
            self.pin(path, "history");
            return;
        }

        if let Some(pinned) = &self.pinned {
            if *pinned != self.log_path {
                tracing::info!(
                    from = %self.log_path.display(),
                    to = %pinned.display(),
                    "switch:pin"
                );
                self.next = Some(pinned.clone());
            }
            return;
        }

        if now - self.last_activity < chrono_duration(SWITCH_AFTER) {
            return;
        }
        let since = rollout::modified(&self.log_path).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            + chrono_duration(RECENCY_MARGIN);
        if let Some(path) = self.locator.recent_any(since) {
            if path != self.log_path {
                tracing::info!(
                    from = %self.log_path.display(),
                    to = %path.display(),
                    "switch:mtime"
                );
                self.next = Some(path);
            }
        }
    }

    fn within_pid_window(&self, now: DateTime<Utc>) -> bool {
        let timeout = self.locator.pid_timeout();
        !timeout.is_zero() && now - self.start_time <= chrono_duration(timeout)
    }

    fn pin(&mut self, path: PathBuf, signal: &'static str) {
        if self.pinned.as_ref() != Some(&path) {
            tracing::debug!(path = %path.display(), signal, "switch:pinned");
        }
        if path != self.log_path {
            tracing::info!(
                from = %self.log_path.display(),
                to = %path.display(),
                signal,
                "switch:handover"
            );
            self.next = Some(path.clone());
        }
        self.pinned = Some(path);
    }
}

impl HandoverProbe for SwitchMonitor {
    fn note_activity(&mut self) {
        self.last_activity = self.locator.clock().now();
    }

    fn poll(&mut self) -> bool {
        self.check();
        self.next.is_some()
    }
}
