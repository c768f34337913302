//! Folds tool activity back into the transcript and shapes the reply.
//!
//! After tools run, the provider needs to see what happened: an assistant
//! message announcing the calls, then one tool-role message per result.
//! The client needs the same information in a different shape, with widget
//! payloads pulled out for rendering.

use mentor_core::error::Result;
use mentor_core::message::{Message, MessageToolCall};
use mentor_core::tool::ToolResult;
use serde::{Deserialize, Serialize};

/// A UI-renderable payload pulled out of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatWidget {
    pub widget_type: String,
    pub data: serde_json::Value,
}

/// One failed tool, summarized for the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolErrorSummary {
    pub tool: String,
    pub message: String,
}

/// The buffered reply for one chat turn. Everything beyond `content` and
/// `tool_results` is derived from the results, so composing twice from the
/// same inputs yields the same reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    /// Final assistant text
    pub content: String,
    /// Widget payloads, in tool execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub widgets: Vec<ChatWidget>,
    /// Results of every tool that ran (or was deferred) this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub has_errors: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ToolErrorSummary>,
    pub requires_confirmation: bool,
    /// Set when a gated tool was deferred; carries the action id to confirm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_data: Option<serde_json::Value>,
}

pub struct ResponseComposer;

impl ResponseComposer {
    /// The assistant message announcing a batch of tool calls, as it goes
    /// into the transcript. Calls are kept in wire form so the transcript
    /// records exactly what the model sent, malformed arguments included.
    pub fn tool_call_message(content: &str, calls: Vec<MessageToolCall>) -> Message {
        let mut message = Message::assistant(content);
        message.tool_calls = calls;
        message
    }

    /// A tool-role message carrying one result, addressed to its call.
    pub fn tool_result_message(call_id: &str, result: &ToolResult) -> Result<Message> {
        let payload = serde_json::to_string(result)?;
        Ok(Message::tool_result(call_id, payload))
    }

    /// Shape the buffered reply. Pure and order-preserving: `tool_results`
    /// keeps execution order and every derived field follows from it.
    pub fn compose(
        session_id: impl Into<String>,
        content: impl Into<String>,
        tool_results: Vec<ToolResult>,
    ) -> ChatResponse {
        let widgets = tool_results
            .iter()
            .filter_map(|r| match (&r.widget_type, &r.widget_data) {
                (Some(t), Some(d)) => Some(ChatWidget {
                    widget_type: t.clone(),
                    data: d.clone(),
                }),
                _ => None,
            })
            .collect();

        // has_errors covers every unsuccessful result, deferred ones included
        let errors: Vec<ToolErrorSummary> = tool_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| ToolErrorSummary {
                tool: r.tool_name.clone(),
                message: r.error_message.clone().unwrap_or_else(|| {
                    if r.requires_confirmation {
                        "awaiting user confirmation".into()
                    } else {
                        "unknown error".into()
                    }
                }),
            })
            .collect();

        let confirmation_data = tool_results
            .iter()
            .find(|r| r.requires_confirmation)
            .map(|r| {
                serde_json::json!({
                    "action_id": r.confirmation_id,
                    "tool": r.tool_name,
                })
            });

        ChatResponse {
            session_id: session_id.into(),
            content: content.into(),
            widgets,
            has_errors: !errors.is_empty(),
            errors,
            requires_confirmation: confirmation_data.is_some(),
            confirmation_data,
            tool_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::message::Role;
    use mentor_core::tool::ToolOutput;
    use serde_json::json;

    #[test]
    fn tool_call_message_carries_all_calls() {
        let calls = vec![
            MessageToolCall {
                id: "call_a".into(),
                name: "create_task".into(),
                arguments: r#"{"title":"x"}"#.into(),
            },
            MessageToolCall {
                id: "call_b".into(),
                name: "query_knowledge".into(),
                arguments: r#"{"query":"导数"}"#.into(),
            },
        ];

        let msg = ResponseComposer::tool_call_message("", calls);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].id, "call_a");
        assert!(msg.tool_calls[1].arguments.contains("导数"));
    }

    #[test]
    fn tool_result_message_roundtrips() {
        let result = ToolResult::ok(
            "create_task",
            ToolOutput::with_data(json!({"task_id": "t1"})),
        );
        let msg = ResponseComposer::tool_result_message("call_a", &result).unwrap();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_a"));

        let parsed: ToolResult = serde_json::from_str(&msg.content).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.tool_name, "create_task");
    }

    #[test]
    fn widgets_and_errors_derived_from_results() {
        let response = ResponseComposer::compose(
            "s1",
            "done",
            vec![
                ToolResult::ok(
                    "create_task",
                    ToolOutput::with_data(json!({}))
                        .widget("task_card", json!({"title": "review"})),
                ),
                ToolResult::failure("query_knowledge", "boom", None),
            ],
        );

        assert_eq!(response.widgets.len(), 1);
        assert_eq!(response.widgets[0].widget_type, "task_card");
        assert!(response.has_errors);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].tool, "query_knowledge");
        assert_eq!(response.errors[0].message, "boom");
        assert!(!response.requires_confirmation);
    }

    #[test]
    fn deferred_result_sets_confirmation_and_counts_as_unsuccessful() {
        let response = ResponseComposer::compose(
            "s1",
            "需要你确认后才会创建。",
            vec![ToolResult::needs_confirmation(
                "batch_create_tasks",
                "act_1",
                json!({"count": 3}),
            )],
        );

        assert!(response.requires_confirmation);
        // A deferred result is not a success, so it counts toward has_errors
        assert!(response.has_errors);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].tool, "batch_create_tasks");
        let data = response.confirmation_data.expect("confirmation data");
        assert_eq!(data["action_id"], "act_1");
        assert_eq!(data["tool"], "batch_create_tasks");
    }

    #[test]
    fn compose_is_idempotent() {
        let results = vec![ToolResult::failure("create_task", "bad date", None)];
        let a = ResponseComposer::compose("s1", "抱歉。", results.clone());
        let b = ResponseComposer::compose("s1", "抱歉。", results);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }
}
