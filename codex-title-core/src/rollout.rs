//! Cheap probes over a session log's leading records, plus directory listings.
//!
//! A log's identity (session id, working directory, start timestamp) lives in
//! its first few records. Probes read at most [`HEAD_SCAN_LINES`] lines and
//! treat unreadable files as carrying no metadata.

use crate::event::{EventKind, RolloutEvent};
use crate::paths::{ROLLOUT_EXTENSION, ROLLOUT_PREFIX};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Lines examined when probing a log's metadata.
pub const HEAD_SCAN_LINES: usize = 200;

/// Session id from the leading `session_meta` record.
pub fn session_id(path: &Path) -> Option<String> {
    scan_head(path, |event| match event.kind {
        EventKind::SessionMeta { id: Some(id), .. } => ControlFlow::Break(id),
        _ => ControlFlow::Continue(()),
    })
}

/// Whether the log was recorded in `cwd`.
///
/// The `session_meta` cwd is authoritative once seen; before it, any
/// `turn_context` naming `cwd` counts as a match.
pub fn matches_cwd(path: &Path, cwd: &Path) -> bool {
    scan_head(path, |event| match event.kind {
        EventKind::SessionMeta { cwd: meta_cwd, .. } => {
            ControlFlow::Break(meta_cwd.is_some_and(|c| Path::new(&c) == cwd))
        }
        EventKind::TurnContext { cwd: Some(c) } if Path::new(&c) == cwd => ControlFlow::Break(true),
        _ => ControlFlow::Continue(()),
    })
    .unwrap_or(false)
}

/// Start timestamp recorded in `session_meta`.
pub fn meta_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    scan_head(path, |event| match event.kind {
        EventKind::SessionMeta { timestamp, .. } => ControlFlow::Break(timestamp),
        _ => ControlFlow::Continue(()),
    })
    .flatten()
}

fn scan_head<T, F>(path: &Path, mut visit: F) -> Option<T>
where
    F: FnMut(RolloutEvent) -> ControlFlow<T>,
{
    let file = File::open(path).ok()?;
    for line in BufReader::new(file).lines().take(HEAD_SCAN_LINES) {
        let Ok(line) = line else {
            break;
        };
        let Some(event) = RolloutEvent::parse_line(&line) else {
            continue;
        };
        if let ControlFlow::Break(found) = visit(event) {
            return Some(found);
        }
    }
    None
}

/// Modification time, `None` when the file is gone.
pub fn modified(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Current size in bytes, `None` when the file is gone.
pub fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// Session logs directly inside `dir`, with their modification times.
pub fn logs_in(dir: &Path) -> Vec<(DateTime<Utc>, PathBuf)> {
    let pattern = format!("{ROLLOUT_PREFIX}*.{ROLLOUT_EXTENSION}");
    glob_with_mtime(dir, &pattern)
}

/// Session logs anywhere under `root`, with their modification times.
pub fn logs_under(root: &Path) -> Vec<(DateTime<Utc>, PathBuf)> {
    let pattern = format!("**/{ROLLOUT_PREFIX}*.{ROLLOUT_EXTENSION}");
    glob_with_mtime(root, &pattern)
}

/// Logs under `root` whose file name ends with `<session_id>.jsonl`.
pub fn logs_for_session(root: &Path, session_id: &str) -> Vec<(DateTime<Utc>, PathBuf)> {
    let pattern = format!(
        "**/*{}.{ROLLOUT_EXTENSION}",
        glob::Pattern::escape(session_id)
    );
    glob_with_mtime(root, &pattern)
}

/// Logs in `dir`, newest first.
pub fn logs_by_mtime(dir: &Path) -> Vec<PathBuf> {
    let mut logs = logs_in(dir);
    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    logs.into_iter().map(|(_, path)| path).collect()
}

/// Most recently modified log in `dir`.
pub fn latest_in(dir: &Path) -> Option<PathBuf> {
    logs_in(dir)
        .into_iter()
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

fn glob_with_mtime(dir: &Path, pattern: &str) -> Vec<(DateTime<Utc>, PathBuf)> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let Ok(paths) = glob::glob(&full) else {
        tracing::debug!(pattern = %full, "invalid glob pattern");
        return Vec::new();
    };
    paths
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| modified(&path).map(|mtime| (mtime, path)))
        .collect()
}
