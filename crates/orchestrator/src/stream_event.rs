//! Client-facing streaming events.
//!
//! `ChatStreamEvent` wraps provider-level fragments into the events the
//! gateway forwards to clients over SSE. Tool-call argument fragments never
//! reach the client; only announced calls and their results do.

use mentor_core::provider::Usage;
use mentor_core::tool::ToolResult;
use serde::{Deserialize, Serialize};

/// Events emitted while one chat turn streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Partial assistant text.
    Text { content: String },

    /// The assistant announced a tool call.
    ToolStart {
        call_id: String,
        #[serde(rename = "tool")]
        name: String,
    },

    /// A tool finished (or was deferred for confirmation).
    ToolResult {
        call_id: String,
        result: ToolResult,
    },

    /// A UI widget produced by a tool.
    Widget {
        widget_type: String,
        #[serde(rename = "widget_data")]
        data: serde_json::Value,
    },

    /// The turn is complete.
    Done {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// An error ended the turn early.
    Error { message: String },
}

impl ChatStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Widget { .. } => "widget",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_event_serialization() {
        let event = ChatStreamEvent::Text {
            content: "你好".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text""#));
    }

    #[test]
    fn tool_result_event_serialization() {
        let event = ChatStreamEvent::ToolResult {
            call_id: "call_1".into(),
            result: ToolResult::failure("create_task", "boom", None),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""success":false"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            ChatStreamEvent::Text { content: "x".into() }.event_type(),
            "text"
        );
        assert_eq!(
            ChatStreamEvent::Done {
                session_id: "s".into(),
                usage: None
            }
            .event_type(),
            "done"
        );
        assert_eq!(
            ChatStreamEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_start","call_id":"c1","tool":"create_task"}"#;
        let event: ChatStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            ChatStreamEvent::ToolStart { call_id, name } => {
                assert_eq!(call_id, "c1");
                assert_eq!(name, "create_task");
            }
            _ => panic!("Wrong variant"),
        }
    }
}
