//! "Resumed rollout" notices in the companion TUI log.
//!
//! When the agent resumes an earlier session it writes a line like
//!
//! ```text
//! 2026-01-04T10:00:00.123Z  INFO Resumed rollout successfully from "/home/u/.codex/sessions/.../rollout-....jsonl"
//! ```
//!
//! The referenced path is the log the resumed session continues in.

use crate::history::{read_appended, tail_lines};
use crate::timestamp;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Lines of the companion log searched for notices, newest first.
pub const SCAN_LINES: usize = 1000;

/// One resume notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeNotice {
    pub at: Option<DateTime<Utc>>,
    pub path: PathBuf,
}

fn notice_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<ts>\d{4}-\d{2}-\d{2}T[0-9:.]+Z)\s+INFO Resum(?:ing|ed) rollout(?: successfully)? from "(?P<path>[^"]+)""#,
        )
        .ok()
    })
    .as_ref()
}

impl ResumeNotice {
    /// Parse a companion-log line; `None` for anything that is not a notice.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = notice_re()?.captures(line)?;
        Some(Self {
            at: caps.name("ts").and_then(|m| timestamp::parse_iso(m.as_str())),
            path: PathBuf::from(caps.name("path")?.as_str()),
        })
    }
}

/// Most recent notices in `log`, newest first.
pub fn recent_notices(log: &Path) -> Vec<ResumeNotice> {
    tail_lines(log, SCAN_LINES)
        .iter()
        .rev()
        .filter_map(|line| ResumeNotice::parse(line))
        .collect()
}

/// Log referenced by the newest notice whose target was recorded in `cwd`.
///
/// Targets that no longer exist are ignored. When no existing target matches
/// `cwd`, the newest existing target is returned instead.
pub fn resumed_log(log: &Path, cwd: &Path) -> Option<PathBuf> {
    resumed_log_where(log, cwd, |_| true)
}

/// [`resumed_log`] restricted to notices accepted by `keep`.
pub fn resumed_log_where<F>(log: &Path, cwd: &Path, keep: F) -> Option<PathBuf>
where
    F: Fn(&ResumeNotice) -> bool,
{
    let mut fallback = None;
    for notice in recent_notices(log) {
        if !keep(&notice) || !notice.path.exists() {
            continue;
        }
        if crate::rollout::matches_cwd(&notice.path, cwd) {
            tracing::debug!(path = %notice.path.display(), "resume:tui");
            return Some(notice.path);
        }
        if fallback.is_none() {
            fallback = Some(notice.path);
        }
    }
    if let Some(path) = &fallback {
        tracing::debug!(path = %path.display(), "resume:tui fallback");
    }
    fallback
}

/// Notices appended to the companion log after a given offset.
#[derive(Debug, Clone)]
pub struct ResumeTail {
    path: PathBuf,
    offset: u64,
}

impl ResumeTail {
    /// Start at the current end of the log; earlier notices are never returned.
    pub fn at_end(path: PathBuf) -> Self {
        let offset = crate::rollout::file_len(&path).unwrap_or(0);
        Self { path, offset }
    }

    /// Log referenced by the notices appended since the last call, chosen
    /// like [`resumed_log`].
    pub fn next_target(&mut self, cwd: &Path) -> Option<PathBuf> {
        let notices: Vec<ResumeNotice> = read_appended(&self.path, &mut self.offset)
            .iter()
            .filter_map(|line| ResumeNotice::parse(line))
            .collect();
        let mut fallback = None;
        for notice in notices.into_iter().rev() {
            if !notice.path.exists() {
                continue;
            }
            if crate::rollout::matches_cwd(&notice.path, cwd) {
                return Some(notice.path);
            }
            fallback.get_or_insert(notice.path);
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notice_variants() {
        let resumed = ResumeNotice::parse(
            r#"2026-01-04T10:00:00.123Z  INFO Resumed rollout successfully from "/s/rollout-a.jsonl""#,
        )
        .unwrap();
        assert_eq!(resumed.path, PathBuf::from("/s/rollout-a.jsonl"));
        assert!(resumed.at.is_some());

        let resuming = ResumeNotice::parse(
            r#"2026-01-04T10:00:00Z INFO Resuming rollout from "/s/rollout-b.jsonl""#,
        )
        .unwrap();
        assert_eq!(resuming.path, PathBuf::from("/s/rollout-b.jsonl"));

        assert!(ResumeNotice::parse("2026-01-04T10:00:00Z WARN Resumed rollout from \"/x\"").is_none());
        assert!(ResumeNotice::parse("INFO Resumed rollout from \"/x\"").is_none());
    }

    #[test]
    fn test_missing_log_has_no_notices() {
        assert!(recent_notices(Path::new("/nonexistent/codex-tui.log")).is_empty());
        assert_eq!(resumed_log(Path::new("/nonexistent/codex-tui.log"), Path::new("/")), None);
    }

    #[test]
    fn test_tail_sees_only_new_notices() {
        let tmp = tempfile::TempDir::new().unwrap();
        let target = tmp.path().join("rollout-b.jsonl");
        std::fs::write(&target, "{\"type\":\"session_meta\",\"payload\":{\"cwd\":\"/work\"}}\n").unwrap();
        let log = tmp.path().join("codex-tui.log");
        let notice = format!(
            "2026-01-04T10:00:00Z INFO Resumed rollout successfully from \"{}\"\n",
            target.display()
        );
        std::fs::write(&log, &notice).unwrap();

        let mut tail = ResumeTail::at_end(log.clone());
        assert_eq!(tail.next_target(Path::new("/work")), None);

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        std::io::Write::write_all(&mut file, notice.as_bytes()).unwrap();
        assert_eq!(tail.next_target(Path::new("/work")), Some(target.clone()));
        assert_eq!(tail.next_target(Path::new("/work")), None);
    }
}
