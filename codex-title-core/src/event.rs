//! Rollout log records, decoded once per line.
//!
//! Every line of a session log is a JSON object `{type, timestamp?, payload}`.
//! [`RolloutEvent::parse_line`] turns a line into one closed [`EventKind`]
//! variant so the turn machine and the locator can match exhaustively instead
//! of probing JSON keys.
//!
//! # Error Handling
//!
//! - **Malformed JSON**: `parse_line` returns `None` and the caller skips the line.
//! - **Unknown record or payload types**: decoded as [`EventKind::Unrecognized`]
//!   or one of the `Other*` variants; never an error.
//! - **Fields of the wrong shape**: treated as absent.

use crate::timestamp;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutEvent {
    /// Top-level `timestamp`, when present and parseable.
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

/// Which tool-call representation a record used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// `function_call` / `function_call_output`
    Function,
    /// `custom_tool_call` / `custom_tool_call_output`
    Custom,
}

/// A tool invocation issued by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub kind: ToolKind,
    pub call_id: Option<String>,
    pub name: Option<String>,
    /// Raw `arguments`: usually a JSON-encoded string.
    pub arguments: Option<Value>,
    /// `status == "completed"` on the call record itself.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// `session_meta`: first record of a log.
    SessionMeta {
        id: Option<String>,
        cwd: Option<String>,
        /// `payload.timestamp`, falling back to the record timestamp.
        timestamp: Option<DateTime<Utc>>,
    },
    /// `turn_context`
    TurnContext { cwd: Option<String> },
    /// `event_msg` / `user_message`
    UserMessage { text: Option<String> },
    /// `event_msg` / `agent_message` or `assistant_message`
    AgentMessage,
    /// `event_msg` / `turn_aborted`
    TurnAborted,
    /// Any other `event_msg` payload.
    OtherEventMsg { msg_type: Option<String> },
    /// `response_item` / `message` with role `user`
    UserResponse { text: Option<String> },
    /// `response_item` / `message` with role `assistant`
    AssistantResponse,
    /// `response_item` / `message` with any other role
    OtherMessage { role: Option<String> },
    /// `response_item` / `reasoning`
    Reasoning,
    ToolCall(ToolCall),
    ToolOutput {
        kind: ToolKind,
        call_id: Option<String>,
        output: Option<String>,
    },
    /// Any other `response_item` payload.
    OtherResponseItem { item_type: Option<String> },
    /// Unknown top-level record type.
    Unrecognized,
    /// Synthetic heartbeat injected by the reader; never read from disk.
    Idle,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    timestamp: Option<Value>,
    #[serde(rename = "type")]
    event_type: Option<Value>,
    payload: Value,
}

impl RolloutEvent {
    /// Decode one log line. `None` when the line is not a JSON object.
    pub fn parse_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        if !value.is_object() {
            return None;
        }
        Some(Self::from_value(value))
    }

    /// Decode an already-parsed record.
    pub fn from_value(value: Value) -> Self {
        let raw: RawEvent = serde_json::from_value(value).unwrap_or_default();
        let timestamp = raw
            .timestamp
            .as_ref()
            .and_then(Value::as_str)
            .and_then(timestamp::parse_iso);
        let payload = &raw.payload;

        let kind = match raw.event_type.as_ref().and_then(Value::as_str) {
            Some("session_meta") => EventKind::SessionMeta {
                id: str_field(payload, "id"),
                cwd: str_field(payload, "cwd"),
                timestamp: payload
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(timestamp::parse_iso)
                    .or(timestamp),
            },
            Some("turn_context") => EventKind::TurnContext {
                cwd: str_field(payload, "cwd"),
            },
            Some("event_msg") => decode_event_msg(payload),
            Some("response_item") => decode_response_item(payload),
            _ => EventKind::Unrecognized,
        };

        Self { timestamp, kind }
    }

    /// The synthetic idle heartbeat.
    pub fn idle() -> Self {
        Self {
            timestamp: None,
            kind: EventKind::Idle,
        }
    }

    /// Whether this record is a user message in either representation.
    pub fn is_user_message(&self) -> bool {
        matches!(
            self.kind,
            EventKind::UserMessage { .. } | EventKind::UserResponse { .. }
        )
    }

    /// Text of a user message, in either representation.
    pub fn user_text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::UserMessage { text } | EventKind::UserResponse { text } => text.as_deref(),
            _ => None,
        }
    }

    /// Agent output of any kind. Feeds idle-done inference.
    pub fn is_response_activity(&self) -> bool {
        match &self.kind {
            EventKind::AgentMessage
            | EventKind::TurnAborted
            | EventKind::AssistantResponse
            | EventKind::Reasoning
            | EventKind::ToolCall(_)
            | EventKind::ToolOutput { .. } => true,
            EventKind::OtherEventMsg { msg_type } => msg_type.is_some(),
            EventKind::OtherResponseItem { item_type } => item_type.is_some(),
            EventKind::SessionMeta { .. }
            | EventKind::TurnContext { .. }
            | EventKind::UserMessage { .. }
            | EventKind::UserResponse { .. }
            | EventKind::OtherMessage { .. }
            | EventKind::Unrecognized
            | EventKind::Idle => false,
        }
    }

    /// Assistant output or an abort: the end of a turn.
    pub fn closes_turn(&self) -> bool {
        matches!(
            self.kind,
            EventKind::AgentMessage | EventKind::TurnAborted | EventKind::AssistantResponse
        )
    }
}

fn decode_event_msg(payload: &Value) -> EventKind {
    match payload.get("type").and_then(Value::as_str) {
        Some("user_message") => EventKind::UserMessage {
            text: str_field(payload, "message"),
        },
        Some("agent_message") | Some("assistant_message") => EventKind::AgentMessage,
        Some("turn_aborted") => EventKind::TurnAborted,
        other => EventKind::OtherEventMsg {
            msg_type: other.map(str::to_string),
        },
    }
}

fn decode_response_item(payload: &Value) -> EventKind {
    match payload.get("type").and_then(Value::as_str) {
        Some("message") => match payload.get("role").and_then(Value::as_str) {
            Some("user") => EventKind::UserResponse {
                text: first_content_text(payload),
            },
            Some("assistant") => EventKind::AssistantResponse,
            role => EventKind::OtherMessage {
                role: role.map(str::to_string),
            },
        },
        Some("reasoning") => EventKind::Reasoning,
        Some(item @ ("function_call" | "custom_tool_call")) => EventKind::ToolCall(ToolCall {
            kind: if item == "function_call" {
                ToolKind::Function
            } else {
                ToolKind::Custom
            },
            call_id: str_field(payload, "call_id"),
            name: str_field(payload, "name"),
            arguments: payload.get("arguments").filter(|v| !v.is_null()).cloned(),
            completed: payload.get("status").and_then(Value::as_str) == Some("completed"),
        }),
        Some(item @ ("function_call_output" | "custom_tool_call_output")) => {
            EventKind::ToolOutput {
                kind: if item == "function_call_output" {
                    ToolKind::Function
                } else {
                    ToolKind::Custom
                },
                call_id: str_field(payload, "call_id"),
                output: str_field(payload, "output"),
            }
        }
        other => EventKind::OtherResponseItem {
            item_type: other.map(str::to_string),
        },
    }
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `content[0].text`, or `content[0].input_text`.
fn first_content_text(payload: &Value) -> Option<String> {
    let entry = payload.get("content")?.as_array()?.first()?;
    ["text", "input_text"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(RolloutEvent::parse_line("{not json").is_none());
        assert!(RolloutEvent::parse_line("[1, 2]").is_none());
        assert!(RolloutEvent::parse_line("").is_none());
    }

    #[test]
    fn test_session_meta() {
        let event = RolloutEvent::parse_line(
            r#"{"type":"session_meta","timestamp":"2026-01-04T00:00:05Z","payload":{"id":"abc","cwd":"/work"}}"#,
        )
        .unwrap();
        let EventKind::SessionMeta { id, cwd, timestamp } = event.kind else {
            panic!("expected session meta");
        };
        assert_eq!(id.as_deref(), Some("abc"));
        assert_eq!(cwd.as_deref(), Some("/work"));
        // Falls back to the record timestamp.
        assert_eq!(timestamp, event.timestamp);
    }

    #[test]
    fn test_user_message_representations() {
        let msg = RolloutEvent::parse_line(
            r#"{"type":"event_msg","payload":{"type":"user_message","message":"hi"}}"#,
        )
        .unwrap();
        assert!(msg.is_user_message());
        assert_eq!(msg.user_text(), Some("hi"));

        let item = RolloutEvent::parse_line(
            r#"{"type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","input_text":"there"}]}}"#,
        )
        .unwrap();
        assert_eq!(item.user_text(), Some("there"));
        assert!(!item.is_response_activity());
    }

    #[test]
    fn test_tool_records() {
        let call = RolloutEvent::parse_line(
            r#"{"type":"response_item","payload":{"type":"custom_tool_call","call_id":"c1","name":"apply_patch","status":"completed"}}"#,
        )
        .unwrap();
        let EventKind::ToolCall(call) = call.kind else {
            panic!("expected tool call");
        };
        assert_eq!(call.kind, ToolKind::Custom);
        assert_eq!(call.call_id.as_deref(), Some("c1"));
        assert!(call.completed);

        let output = RolloutEvent::parse_line(
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c2","output":"Exit code: 0"}}"#,
        )
        .unwrap();
        assert_eq!(
            output.kind,
            EventKind::ToolOutput {
                kind: ToolKind::Function,
                call_id: Some("c2".into()),
                output: Some("Exit code: 0".into()),
            }
        );
    }

    #[test]
    fn test_turn_closing_and_activity() {
        let agent = RolloutEvent::parse_line(
            r#"{"type":"event_msg","payload":{"type":"agent_message","message":"done"}}"#,
        )
        .unwrap();
        assert!(agent.closes_turn());
        assert!(agent.is_response_activity());

        let tokens = RolloutEvent::parse_line(r#"{"type":"event_msg","payload":{"type":"token_count"}}"#)
            .unwrap();
        assert!(!tokens.closes_turn());
        assert!(tokens.is_response_activity());

        let unknown = RolloutEvent::parse_line(r#"{"type":"compacted","payload":{}}"#).unwrap();
        assert_eq!(unknown.kind, EventKind::Unrecognized);
        assert!(!unknown.is_response_activity());
        assert!(!RolloutEvent::idle().is_response_activity());
    }

    #[test]
    fn test_garbled_timestamp_is_absent() {
        let event = RolloutEvent::parse_line(
            r#"{"type":"event_msg","timestamp":"yesterday","payload":{"type":"agent_message"}}"#,
        )
        .unwrap();
        assert_eq!(event.timestamp, None);
        assert_eq!(event.kind, EventKind::AgentMessage);
    }
}
