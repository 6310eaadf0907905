//! Tail-following reader over a session log.
//!
//! [`EventStream`] yields admitted [`RolloutEvent`]s from a [`TailCursor`]
//! position and then keeps following the file as the agent appends to it.
//! It never returns on end of file; it ends when the stop flag is set or the
//! [`HandoverProbe`] reports that the session moved to another log.
//!
//! # Incremental Reading
//!
//! - A cursor offset that lands mid-line skips to the start of the next line.
//! - An offset past the end of the file (the log was replaced) reads from the start.
//! - A trailing line without its newline is held back until the rest arrives.
//! - A file that shrinks while being followed is re-read from the start.

use crate::event::RolloutEvent;
use crate::timestamp::TimestampOracle;
use crate::watcher::Flag;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Sleep between reads that find no new data.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where a tailing attempt starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailCursor {
    pub path: PathBuf,
    /// Byte offset; `None` reads from the beginning.
    pub offset: Option<u64>,
}

impl TailCursor {
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: None,
        }
    }

    pub fn at(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset: Some(offset),
        }
    }

    /// Positioned at the current end of the file (start when it does not exist).
    pub fn at_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = crate::rollout::file_len(&path);
        Self { path, offset }
    }
}

/// Lets the stream ask, between lines, whether the session moved elsewhere.
pub trait HandoverProbe {
    /// An event was admitted.
    fn note_activity(&mut self);

    /// `true` once a handover target is known; the stream then ends.
    fn poll(&mut self) -> bool;
}

/// Never hands over.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHandover;

impl HandoverProbe for NoHandover {
    fn note_activity(&mut self) {}

    fn poll(&mut self) -> bool {
        false
    }
}

impl<H: HandoverProbe + ?Sized> HandoverProbe for &mut H {
    fn note_activity(&mut self) {
        (**self).note_activity();
    }

    fn poll(&mut self) -> bool {
        (**self).poll()
    }
}

/// Admission and heartbeat settings for one stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Events older than this (by trustworthy timestamp) are dropped.
    pub floor: Option<DateTime<Utc>>,
    pub oracle: TimestampOracle,
    /// Emit [`RolloutEvent::idle`] after this long without an admitted event.
    pub idle_interval: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            floor: None,
            oracle: TimestampOracle::default(),
            idle_interval: None,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Lazy, unbounded sequence of admitted events from one log.
pub struct EventStream<H: HandoverProbe = NoHandover> {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset just past the last complete line consumed.
    pos: u64,
    partial: Vec<u8>,
    options: StreamOptions,
    stop: Flag,
    handover: H,
    last_idle: Instant,
    finished: bool,
}

impl<H: HandoverProbe> EventStream<H> {
    pub fn open(
        cursor: &TailCursor,
        options: StreamOptions,
        stop: Flag,
        handover: H,
    ) -> std::io::Result<Self> {
        let file = File::open(&cursor.path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let pos = align(&mut reader, cursor.offset, len)?;
        Ok(Self {
            path: cursor.path.clone(),
            reader,
            pos,
            partial: Vec::new(),
            options,
            stop,
            handover,
            last_idle: Instant::now(),
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last complete line read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn handover_mut(&mut self) -> &mut H {
        &mut self.handover
    }

    pub fn into_handover(self) -> H {
        self.handover
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.reader.read_until(b'\n', &mut self.partial) {
            Ok(_) if self.partial.last() == Some(&b'\n') => {
                self.pos += self.partial.len() as u64;
                Some(std::mem::take(&mut self.partial))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "read failed");
                None
            }
        }
    }

    fn restart_if_truncated(&mut self) {
        let Some(len) = crate::rollout::file_len(&self.path) else {
            return;
        };
        if len >= self.pos + self.partial.len() as u64 {
            return;
        }
        tracing::debug!(path = %self.path.display(), len, pos = self.pos, "log truncated, rereading");
        if self.reader.seek(SeekFrom::Start(0)).is_ok() {
            self.pos = 0;
            self.partial.clear();
        }
    }

    fn admit(&self, line: &[u8]) -> Option<RolloutEvent> {
        let event = RolloutEvent::parse_line(&String::from_utf8_lossy(line))?;
        self.options
            .oracle
            .admits(event.timestamp, self.options.floor)
            .then_some(event)
    }
}

impl<H: HandoverProbe> Iterator for EventStream<H> {
    type Item = RolloutEvent;

    fn next(&mut self) -> Option<RolloutEvent> {
        loop {
            if self.finished || self.stop.is_set() {
                return None;
            }

            if let Some(line) = self.next_line() {
                let admitted = self.admit(&line);
                if admitted.is_some() {
                    self.handover.note_activity();
                    self.last_idle = Instant::now();
                }
                if self.handover.poll() {
                    self.finished = true;
                }
                match admitted {
                    Some(event) => return Some(event),
                    None => continue,
                }
            }

            std::thread::sleep(self.options.poll_interval);
            if self.handover.poll() {
                self.finished = true;
                return None;
            }
            self.restart_if_truncated();
            if let Some(interval) = self.options.idle_interval.filter(|i| !i.is_zero()) {
                if self.last_idle.elapsed() >= interval {
                    self.last_idle = Instant::now();
                    return Some(RolloutEvent::idle());
                }
            }
        }
    }
}

/// Position `reader` at the first full line at or after `offset`.
fn align(reader: &mut BufReader<File>, offset: Option<u64>, len: u64) -> std::io::Result<u64> {
    let offset = match offset {
        Some(offset) if offset > 0 && offset <= len => offset,
        _ => return Ok(0),
    };
    reader.seek(SeekFrom::Start(offset - 1))?;
    let mut prev = [0u8; 1];
    reader.read_exact(&mut prev)?;
    if prev[0] == b'\n' {
        return Ok(offset);
    }
    // Inside an unterminated last line the remainder arrives later and is
    // dropped as a malformed fragment.
    let mut skipped = Vec::new();
    reader.read_until(b'\n', &mut skipped)?;
    Ok(offset + skipped.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::io::Write;
    use tempfile::TempDir;

    const USER: &str = r#"{"type":"event_msg","timestamp":"2026-01-04T00:00:10Z","payload":{"type":"user_message","message":"hi"}}"#;
    const AGENT: &str = r#"{"type":"event_msg","timestamp":"2026-01-04T00:00:20Z","payload":{"type":"agent_message"}}"#;

    fn options() -> StreamOptions {
        StreamOptions {
            poll_interval: Duration::from_millis(5),
            ..StreamOptions::default()
        }
    }

    /// Stops after `n` polls so tests never hang.
    struct PollBudget(usize);

    impl HandoverProbe for PollBudget {
        fn note_activity(&mut self) {}

        fn poll(&mut self) -> bool {
            self.0 = self.0.saturating_sub(1);
            self.0 == 0
        }
    }

    #[test]
    fn test_reads_existing_lines_and_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, format!("{USER}\nnot json\n{AGENT}\n")).unwrap();

        let mut probe = PollBudget(10);
        let stream =
            EventStream::open(&TailCursor::from_start(&path), options(), Flag::new(), &mut probe).unwrap();
        let kinds: Vec<EventKind> = stream.map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(kinds[0], EventKind::UserMessage { .. }));
        assert_eq!(kinds[1], EventKind::AgentMessage);
    }

    #[test]
    fn test_offset_aligns_to_next_full_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, format!("{USER}\n{AGENT}\n")).unwrap();

        // Exactly at a line start: nothing is skipped.
        let at_boundary = TailCursor::at(&path, USER.len() as u64 + 1);
        let mut probe = PollBudget(5);
        let events: Vec<_> = EventStream::open(&at_boundary, options(), Flag::new(), &mut probe)
            .unwrap()
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AgentMessage);

        // Mid-line: the rest of that line is dropped.
        let mid_line = TailCursor::at(&path, 5);
        let mut probe = PollBudget(5);
        let events: Vec<_> = EventStream::open(&mid_line, options(), Flag::new(), &mut probe)
            .unwrap()
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AgentMessage);

        // Past the end (file replaced): start over.
        let past_end = TailCursor::at(&path, 1_000_000);
        let mut probe = PollBudget(5);
        let events: Vec<_> = EventStream::open(&past_end, options(), Flag::new(), &mut probe)
            .unwrap()
            .collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_floor_filters_old_events() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, format!("{USER}\n{AGENT}\n{{\"type\":\"event_msg\",\"payload\":{{}}}}\n")).unwrap();

        let floor = crate::timestamp::parse_iso("2026-01-04T00:00:15Z");
        let opts = StreamOptions {
            floor,
            oracle: TimestampOracle::new(Some(Duration::from_secs(300))),
            ..options()
        };
        let mut probe = PollBudget(10);
        let events: Vec<_> = EventStream::open(&TailCursor::from_start(&path), opts, Flag::new(), &mut probe)
            .unwrap()
            .collect();
        // The user message predates the floor; the untimestamped record is rejected.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AgentMessage);
    }

    #[test]
    fn test_follows_appended_lines_and_holds_partial_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, "").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut file = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            std::thread::sleep(Duration::from_millis(30));
            file.write_all(&AGENT.as_bytes()[..10]).unwrap();
            file.flush().unwrap();
            std::thread::sleep(Duration::from_millis(30));
            file.write_all(&AGENT.as_bytes()[10..]).unwrap();
            file.write_all(b"\n").unwrap();
        });

        let stop = Flag::new();
        let mut probe = NoHandover;
        let mut stream =
            EventStream::open(&TailCursor::from_start(&path), options(), stop.clone(), &mut probe).unwrap();
        let event = stream.next().unwrap();
        assert_eq!(event.kind, EventKind::AgentMessage);
        assert_eq!(stream.position(), AGENT.len() as u64 + 1);
        writer.join().unwrap();

        stop.set();
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_idle_heartbeats() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, "").unwrap();

        let opts = StreamOptions {
            idle_interval: Some(Duration::from_millis(20)),
            ..options()
        };
        let mut probe = NoHandover;
        let mut stream = EventStream::open(&TailCursor::from_start(&path), opts, Flag::new(), &mut probe).unwrap();
        assert_eq!(stream.next().map(|e| e.kind), Some(EventKind::Idle));
        assert_eq!(stream.next().map(|e| e.kind), Some(EventKind::Idle));
    }

    #[test]
    fn test_truncation_rereads_from_start() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, format!("{USER}\n{USER}\n")).unwrap();

        let mut probe = NoHandover;
        let mut stream = EventStream::open(&TailCursor::at_end(&path), options(), Flag::new(), &mut probe).unwrap();
        std::fs::write(&path, format!("{AGENT}\n")).unwrap();
        assert_eq!(stream.next().map(|e| e.kind), Some(EventKind::AgentMessage));
    }

    #[test]
    fn test_handover_ends_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rollout-a.jsonl");
        std::fs::write(&path, format!("{USER}\n{AGENT}\n")).unwrap();

        // The first poll (after the first line) reports a handover.
        let mut probe = PollBudget(1);
        let events: Vec<_> = EventStream::open(&TailCursor::from_start(&path), options(), Flag::new(), &mut probe)
            .unwrap()
            .collect();
        assert_eq!(events.len(), 1);
    }
}
