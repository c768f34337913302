//! Provider abstraction and streaming fragment protocol.
//!
//! A provider is an upstream LLM endpoint. It can answer in one buffered
//! response or as a stream of events. The event protocol is deliberately
//! small: text deltas interleave with tool-call fragments, every tool call is
//! bracketed by a start/end pair, and a `Done` event closes the stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// One fragment of a streamed provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// A chunk of assistant text
    TextDelta { content: String },

    /// A tool call opened. `call_id` is unique within the response.
    ToolStart { call_id: String, name: String },

    /// A fragment of a tool call's arguments. Some providers repeat the name
    /// on later fragments, some omit it; both are accepted.
    ToolDelta {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments: String,
    },

    /// A tool call closed; its arguments are complete.
    ToolEnd { call_id: String },

    /// End of stream. No further events follow.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl ProviderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProviderEvent::TextDelta { .. } => "text_delta",
            ProviderEvent::ToolStart { .. } => "tool_start",
            ProviderEvent::ToolDelta { .. } => "tool_delta",
            ProviderEvent::ToolEnd { .. } => "tool_end",
            ProviderEvent::Done { .. } => "done",
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool declaration in the provider's function-calling format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the parameters
    pub parameters: serde_json::Value,
}

/// A request to a provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model identifier (e.g. "deepseek-chat")
    pub model: String,

    /// Conversation so far, oldest first
    pub messages: Vec<Message>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Tools the model may call. Empty means tool calling is disabled.
    pub tools: Vec<ToolDefinition>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// A copy of this request with tool calling disabled. Used for the
    /// continuation call after tool results, so the model must answer in
    /// text and the turn cannot recurse into another tool round.
    pub fn without_tools(&self) -> Self {
        let mut req = self.clone();
        req.tools = Vec::new();
        req
    }
}

/// A complete, buffered provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// The assistant message, including any announced tool calls
    pub message: Message,

    /// Token usage, when reported
    pub usage: Option<Usage>,

    /// Which model actually served the request
    pub model: String,
}

/// Receiver half of a provider event stream.
pub type ProviderStream = mpsc::Receiver<std::result::Result<ProviderEvent, ProviderError>>;

/// An upstream LLM endpoint.
///
/// Implementations spawn their own reader task for `chat_stream` and send
/// events into the returned channel. Dropping the receiver cancels the
/// in-flight request: the sender's `send` fails and the task exits.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g. "deepseek", "mock").
    fn name(&self) -> &str;

    /// One buffered request/response round trip.
    async fn chat(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Streamed variant of [`Provider::chat`].
    async fn chat_stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderStream, ProviderError>;

    /// Continuation after tool execution: the transcript in `request` already
    /// contains the assistant's tool calls and the tool-role results. The
    /// default strips tool declarations and re-enters `chat`, so the model
    /// answers in text.
    async fn continue_with_tool_results(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.chat(request.without_tools()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ProviderEvent::ToolStart {
            call_id: "call_1".into(),
            name: "create_task".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_start");
        assert_eq!(json["call_id"], "call_1");
    }

    #[test]
    fn tool_delta_name_is_optional() {
        let json = r#"{"type":"tool_delta","call_id":"call_1","arguments":"{\"ti"}"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        match event {
            ProviderEvent::ToolDelta { name, arguments, .. } => {
                assert!(name.is_none());
                assert_eq!(arguments, "{\"ti");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn without_tools_strips_declarations() {
        let req = ProviderRequest::new("deepseek-chat", vec![Message::user("hi")]).with_tools(vec![
            ToolDefinition {
                name: "create_task".into(),
                description: "Create a task".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ]);
        let stripped = req.without_tools();
        assert!(stripped.tools.is_empty());
        assert_eq!(stripped.model, req.model);
        assert_eq!(stripped.messages.len(), 1);
    }
}
