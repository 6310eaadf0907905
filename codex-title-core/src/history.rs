//! Reads of the global prompt history index (`history.jsonl`).
//!
//! Each line is `{"session_id": "...", "ts": <epoch seconds>, ...}` and is
//! appended when a user submits a prompt in any session. A session id showing
//! up here is the strongest evidence that a human actually typed into it.

use crate::timestamp;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Lines consulted when only the recent tail of the index matters.
pub const RECENT_LINES: usize = 200;

/// One parsed history line.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub session_id: Option<String>,
    pub ts: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    fn parse(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        Some(Self {
            session_id: value
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            ts: value.get("ts").and_then(timestamp::parse_epoch),
        })
    }
}

/// The last `limit` lines of a text file, oldest first. Unreadable files yield nothing.
pub(crate) fn tail_lines(path: &Path, limit: usize) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let mut lines = VecDeque::with_capacity(limit.min(1024));
    for line in BufReader::new(file).split(b'\n') {
        let Ok(bytes) = line else {
            break;
        };
        if lines.len() == limit {
            lines.pop_front();
        }
        lines.push_back(String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string());
    }
    lines.into()
}

/// Session id of the most recent history entry.
pub fn latest_session_id(path: &Path) -> Option<String> {
    tail_lines(path, RECENT_LINES)
        .iter()
        .rev()
        .filter_map(|line| HistoryEntry::parse(line))
        .find_map(|entry| entry.session_id)
}

/// Whether `session_id` appears in the index.
///
/// `limit` restricts the search to the most recent lines; `None` scans the
/// whole file.
pub fn contains_session(path: &Path, session_id: &str, limit: Option<usize>) -> bool {
    let matches = |line: &str| {
        HistoryEntry::parse(line).is_some_and(|e| e.session_id.as_deref() == Some(session_id))
    };
    match limit {
        Some(limit) => tail_lines(path, limit).iter().rev().any(|l| matches(l)),
        None => {
            let Ok(file) = File::open(path) else {
                return false;
            };
            BufReader::new(file)
                .split(b'\n')
                .map_while(|line| line.ok())
                .any(|bytes| matches(&String::from_utf8_lossy(&bytes)))
        }
    }
}

/// Answers "has a real user been confirmed for this session?".
pub trait HistoryProbe {
    fn confirms(&self) -> bool;
}

impl<F: Fn() -> bool> HistoryProbe for F {
    fn confirms(&self) -> bool {
        self()
    }
}

/// Never confirms anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistoryProbe for NoHistory {
    fn confirms(&self) -> bool {
        false
    }
}

/// Looks one session up in the recent tail of the history index.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    path: PathBuf,
    session_id: Option<String>,
}

impl SessionHistory {
    pub fn new(path: PathBuf, session_id: Option<String>) -> Self {
        Self { path, session_id }
    }
}

impl HistoryProbe for SessionHistory {
    fn confirms(&self) -> bool {
        self.session_id
            .as_deref()
            .is_some_and(|id| contains_session(&self.path, id, Some(RECENT_LINES)))
    }
}

/// Incremental reader over lines appended to the index after a given offset.
#[derive(Debug, Clone)]
pub struct HistoryTail {
    path: PathBuf,
    offset: u64,
}

impl HistoryTail {
    /// Start at the current end of the file; earlier entries are never returned.
    pub fn at_end(path: PathBuf) -> Self {
        let offset = crate::rollout::file_len(&path).unwrap_or(0);
        Self { path, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Complete lines appended since the last call.
    ///
    /// A truncated file restarts from the beginning. A trailing partial line is
    /// left for the next call.
    pub fn read_new(&mut self) -> Vec<HistoryEntry> {
        read_appended(&self.path, &mut self.offset)
            .iter()
            .filter_map(|line| HistoryEntry::parse(line))
            .collect()
    }
}

/// Complete lines appended to `path` past `*offset`, advancing the offset.
///
/// A file shorter than the offset was truncated or replaced and is read from
/// the start.
pub(crate) fn read_appended(path: &Path, offset: &mut u64) -> Vec<String> {
    let Some(len) = crate::rollout::file_len(path) else {
        return Vec::new();
    };
    if len < *offset {
        *offset = 0;
    }
    if len == *offset {
        return Vec::new();
    }

    let mut buf = Vec::new();
    let read = File::open(path).and_then(|mut file| {
        file.seek(SeekFrom::Start(*offset))?;
        file.take(len - *offset).read_to_end(&mut buf)
    });
    if let Err(e) = read {
        tracing::debug!(path = %path.display(), error = %e, "append read failed");
        return Vec::new();
    }

    let Some(complete) = buf.iter().rposition(|&b| b == b'\n').map(|i| i + 1) else {
        return Vec::new();
    };
    *offset += complete as u64;
    String::from_utf8_lossy(&buf[..complete])
        .lines()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_latest_and_contains() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        append(
            &path,
            "{\"session_id\":\"old\",\"ts\":1}\nnot json\n{\"session_id\":\"new\",\"ts\":\"2\"}\n{\"ts\":3}\n",
        );
        assert_eq!(latest_session_id(&path).as_deref(), Some("new"));
        assert!(contains_session(&path, "old", None));
        assert!(!contains_session(&path, "old", Some(2)));
        assert!(!contains_session(&path, "missing", None));
        assert_eq!(latest_session_id(&tmp.path().join("absent")), None);
    }

    #[test]
    fn test_session_history_probe() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        append(&path, "{\"session_id\":\"abc\",\"ts\":1}\n");
        assert!(SessionHistory::new(path.clone(), Some("abc".into())).confirms());
        assert!(!SessionHistory::new(path, None).confirms());
        assert!(!NoHistory.confirms());
        assert!((|| true).confirms());
    }

    #[test]
    fn test_tail_reads_only_appended_complete_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        append(&path, "{\"session_id\":\"before\",\"ts\":1}\n");

        let mut tail = HistoryTail::at_end(path.clone());
        assert!(tail.read_new().is_empty());

        append(&path, "{\"session_id\":\"a\",\"ts\":2}\n{\"session_id\":\"b\"");
        let entries = tail.read_new();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id.as_deref(), Some("a"));

        append(&path, ",\"ts\":3}\n");
        let entries = tail.read_new();
        assert_eq!(entries[0].session_id.as_deref(), Some("b"));
        assert!(entries[0].ts.is_some());
    }

    #[test]
    fn test_tail_restarts_after_truncation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        append(&path, "{\"session_id\":\"a\",\"ts\":1}\n{\"session_id\":\"b\",\"ts\":1}\n");
        let mut tail = HistoryTail::at_end(path.clone());

        std::fs::write(&path, "{\"session_id\":\"c\",\"ts\":1}\n").unwrap();
        let entries = tail.read_new();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id.as_deref(), Some("c"));
    }
}
