//! Turn state machine.
//!
//! Consumes decoded [`RolloutEvent`]s (plus synthetic idle heartbeats) and
//! tracks whether a user turn is open, which tool calls are outstanding, and
//! whether a `git commit` succeeded inside the current turn.
//!
//! A turn opens on a user message and closes on an assistant message or an
//! abort. Tool-only turns never produce a closing message; they are closed
//! by idle inference once nothing has happened for the idle timeout and no
//! tool call is still outstanding.
//!
//! Messages injected by the CLI at session start (AGENTS.md, environment
//! context) arrive as user messages. Until a real prompt has been confirmed
//! they are invisible: they do not open a turn.

use crate::command;
use crate::error::Result;
use crate::event::{EventKind, RolloutEvent, ToolKind};
use crate::history::{HistoryProbe, NoHistory};
use crate::timestamp::TimestampOracle;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

/// Prefixes of user messages the CLI injects on its own.
pub const BOOTSTRAP_PREFIXES: &[&str] = &[
    "# AGENTS.md instructions",
    "<environment_context>",
    "<user_instructions>",
    "<INSTRUCTIONS>",
];

/// Slash commands that re-attach to an earlier session.
pub const RESUME_COMMANDS: &[&str] = &["/resume", "/last"];

pub fn is_bootstrap_message(text: &str) -> bool {
    let text = text.trim_start();
    BOOTSTRAP_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
}

/// `/resume` or `/last`, case-insensitive.
pub fn is_resume_command(text: Option<&str>) -> bool {
    let Some(text) = text else {
        return false;
    };
    let text = text.trim_start().to_lowercase();
    RESUME_COMMANDS.iter().any(|cmd| text.starts_with(cmd))
}

/// Outcome of a closed turn, before commit correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnVerdict {
    /// A `git commit` tool call exited 0 during the turn.
    pub commit_seen: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Observable effect of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A user message opened a turn.
    TurnOpened,
    /// Reasoning or a tool call inside an open turn.
    StillRunning,
    /// The turn ended, explicitly or by idle inference.
    TurnClosed(TurnVerdict),
}

/// Mutable state of one watched log.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    /// A user turn is open.
    pub pending_user: bool,
    /// A non-bootstrap user message has appeared, or the history index confirmed one.
    pub real_user_seen: bool,
    /// Some turn has closed.
    pub seen_assistant: bool,
    pub pending_tool_calls: HashSet<String>,
    pub pending_commit_calls: HashSet<String>,
    pub turn_commit_seen: bool,
    /// `turn_commit_seen` as of the most recent close.
    pub last_turn_commit: bool,
    pub last_user_ts: Option<DateTime<Utc>>,
    pub last_assistant_ts: Option<DateTime<Utc>>,
    /// Log timestamp of the latest response-type event in the open turn.
    pub last_response_ts: Option<DateTime<Utc>>,
    /// Whether the open turn has produced any response-type event.
    pub response_seen: bool,
    /// Monotonic time of the latest response-type event.
    pub last_response_activity: Option<Instant>,
}

/// Whether an idle heartbeat should close the open turn.
pub fn should_idle_done(
    pending_user: bool,
    real_user_seen: bool,
    pending_tool_calls: &HashSet<String>,
    last_response_activity: Option<Instant>,
    now: Instant,
    idle_timeout: Option<Duration>,
) -> bool {
    let Some(timeout) = idle_timeout.filter(|t| !t.is_zero()) else {
        return false;
    };
    if !pending_user || !real_user_seen || !pending_tool_calls.is_empty() {
        return false;
    }
    let Some(last) = last_response_activity else {
        return false;
    };
    now.saturating_duration_since(last) >= timeout
}

#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
    idle_timeout: Option<Duration>,
}

impl TurnMachine {
    /// `real_user_seen` seeds the state, e.g. from a history-index hit.
    pub fn new(real_user_seen: bool, idle_timeout: Option<Duration>) -> Self {
        Self {
            state: TurnState {
                real_user_seen,
                ..TurnState::default()
            },
            idle_timeout,
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Feed one event. `now` is the monotonic arrival time.
    pub fn apply(
        &mut self,
        event: &RolloutEvent,
        history: &dyn HistoryProbe,
        now: Instant,
    ) -> Option<Transition> {
        if event.is_user_message() {
            return self.open_turn(event, history);
        }

        if event.is_response_activity() {
            let state = &mut self.state;
            state.last_response_activity = Some(now);
            state.response_seen = true;
            if event.timestamp.is_some() {
                state.last_response_ts = event.timestamp;
            }
        }

        match &event.kind {
            EventKind::Idle => self.idle_tick(now),
            EventKind::AgentMessage | EventKind::TurnAborted | EventKind::AssistantResponse => {
                self.close_turn(event.timestamp)
            }
            EventKind::ToolCall(call) => {
                if let Some(call_id) = &call.call_id {
                    if call.completed {
                        self.state.pending_tool_calls.remove(call_id);
                    } else {
                        self.state.pending_tool_calls.insert(call_id.clone());
                    }
                    if command::extract_command(call).is_some_and(|cmd| command::has_git_commit(&cmd)) {
                        self.state.pending_commit_calls.insert(call_id.clone());
                    }
                }
                self.running()
            }
            EventKind::ToolOutput {
                kind,
                call_id,
                output,
            } => {
                if let Some(call_id) = call_id {
                    self.state.pending_tool_calls.remove(call_id);
                    if *kind == ToolKind::Function
                        && self.state.pending_commit_calls.remove(call_id)
                        && output.as_deref().and_then(command::parse_exit_code) == Some(0)
                    {
                        self.state.turn_commit_seen = true;
                    }
                }
                None
            }
            EventKind::Reasoning => self.running(),
            _ => None,
        }
    }

    /// Close the open turn if idle inference allows it.
    pub fn idle_tick(&mut self, now: Instant) -> Option<Transition> {
        let state = &self.state;
        if !should_idle_done(
            state.pending_user,
            state.real_user_seen,
            &state.pending_tool_calls,
            state.last_response_activity,
            now,
            self.idle_timeout,
        ) {
            return None;
        }
        let closed_at = self.state.last_response_ts;
        self.close_turn(closed_at)
    }

    fn open_turn(&mut self, event: &RolloutEvent, history: &dyn HistoryProbe) -> Option<Transition> {
        let real = self.state.real_user_seen
            || event.user_text().is_some_and(|text| !is_bootstrap_message(text))
            || history.confirms();
        if !real {
            return None;
        }
        let state = &mut self.state;
        state.real_user_seen = true;
        state.pending_user = true;
        state.pending_tool_calls.clear();
        state.pending_commit_calls.clear();
        state.turn_commit_seen = false;
        state.response_seen = false;
        state.last_response_activity = None;
        state.last_response_ts = None;
        if event.timestamp.is_some() {
            state.last_user_ts = event.timestamp;
        }
        Some(Transition::TurnOpened)
    }

    fn close_turn(&mut self, ts: Option<DateTime<Utc>>) -> Option<Transition> {
        let state = &mut self.state;
        state.pending_user = false;
        state.seen_assistant = true;
        state.last_turn_commit = state.turn_commit_seen;
        state.last_response_activity = None;
        if ts.is_some() {
            state.last_assistant_ts = ts;
        }
        if !state.real_user_seen {
            return None;
        }
        Some(Transition::TurnClosed(TurnVerdict {
            commit_seen: state.turn_commit_seen,
            opened_at: state.last_user_ts,
            closed_at: state.last_assistant_ts,
        }))
    }

    fn running(&self) -> Option<Transition> {
        (self.state.pending_user && self.state.real_user_seen).then_some(Transition::StillRunning)
    }
}

/// Summary of a log's existing content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogState {
    pub pending_user: bool,
    pub seen_assistant: bool,
    pub last_user_ts: Option<DateTime<Utc>>,
    pub last_assistant_ts: Option<DateTime<Utc>>,
    pub last_turn_commit: bool,
}

impl LogState {
    /// Verdict of the most recent closed turn.
    pub fn verdict(&self) -> TurnVerdict {
        TurnVerdict {
            commit_seen: self.last_turn_commit,
            opened_at: self.last_user_ts,
            closed_at: self.last_assistant_ts,
        }
    }
}

/// Replay a whole log through the turn machine.
///
/// A turn left open at end of file is closed by idle inference when its last
/// response is older than the idle timeout, judged by log timestamps against
/// `now`. Log timestamps outside the skew tolerance of `now` never close it.
pub fn collect_log_state(
    path: &Path,
    history_seen: bool,
    oracle: &TimestampOracle,
    idle_timeout: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<LogState> {
    let file = File::open(path)?;
    let mut machine = TurnMachine::new(history_seen, idle_timeout);
    let replayed_at = Instant::now();
    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        let Some(event) = RolloutEvent::parse_line(&String::from_utf8_lossy(&line)) else {
            continue;
        };
        machine.apply(&event, &NoHistory, replayed_at);
    }

    let mut state = machine.state;
    if let Some(timeout) = idle_timeout.filter(|t| !t.is_zero()) {
        let idle_since = state.last_response_ts.filter(|ts| oracle.trustworthy(*ts, now));
        if state.pending_user
            && state.real_user_seen
            && state.response_seen
            && state.pending_tool_calls.is_empty()
        {
            if let Some(last) = idle_since {
                if now - last >= crate::clock::chrono_duration(timeout) {
                    state.pending_user = false;
                    state.seen_assistant = true;
                    state.last_turn_commit = state.turn_commit_seen;
                    state.last_assistant_ts.get_or_insert(last);
                }
            }
        }
    }

    Ok(LogState {
        pending_user: state.pending_user,
        seen_assistant: state.seen_assistant,
        last_user_ts: state.last_user_ts,
        last_assistant_ts: state.last_assistant_ts,
        last_turn_commit: state.last_turn_commit,
    })
}
