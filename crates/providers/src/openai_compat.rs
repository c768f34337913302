//! OpenAI-compatible provider implementation.
//!
//! Works with DeepSeek, OpenAI, and any endpoint exposing an
//! OpenAI-compatible `/v1/chat/completions` route.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, re-emitted as bracketed
//!   start/delta/end events per call

use async_trait::async_trait;
use futures::StreamExt;
use mentor_core::error::ProviderError;
use mentor_core::message::{Message, MessageToolCall, Role};
use mentor_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
///
/// The upstream wire format streams tool-call fragments keyed by a choice
/// index. This provider normalizes that into the per-call event protocol:
/// one `ToolStart`, zero or more `ToolDelta`s, one `ToolEnd`. A call is
/// closed when a fragment for a later index arrives or when the model
/// reports `finish_reason == "tool_calls"`. A call the upstream never
/// closes gets no `ToolEnd`, and downstream drops it.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create a DeepSeek provider (convenience constructor).
    pub fn deepseek(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("deepseek", "https://api.deepseek.com/v1", api_key, 120)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, 120)
    }

    /// Convert our Message types to the upstream API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to the upstream API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": stream,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    /// Map a non-200 response to the matching provider error.
    fn status_error(status: u16, error_body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => {
                warn!(status, body = %error_body, "Provider returned error");
                ProviderError::ApiError {
                    status_code: status,
                    message: error_body,
                }
            }
        }
    }
}

#[async_trait]
impl mentor_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            tool_call_id: None,
            timestamp: chrono::Utc::now(),
        };

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
        })
    }

    async fn chat_stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and re-emit normalized
        // events. Receiver drop makes every send fail and the task exits.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut emitter = EventEmitter::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx.send(Ok(ProviderEvent::Done { usage: None })).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(stream_resp) => {
                            for event in emitter.ingest(&stream_resp) {
                                if tx.send(Ok(event)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }

                            // Usage arrives in a final choices-free chunk
                            if let Some(usage) = stream_resp.usage {
                                let _ = tx
                                    .send(Ok(ProviderEvent::Done {
                                        usage: Some(Usage {
                                            prompt_tokens: usage.prompt_tokens,
                                            completion_tokens: usage.completion_tokens,
                                            total_tokens: usage.total_tokens,
                                        }),
                                    }))
                                    .await;
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Upstream closed without [DONE]. Any open tool call stays
            // unterminated on purpose.
            let _ = tx.send(Ok(ProviderEvent::Done { usage: None })).await;
        });

        Ok(rx)
    }
}

/// Turns index-keyed upstream fragments into bracketed per-call events.
struct EventEmitter {
    /// Index of the currently open tool call, with its call_id
    open_call: Option<(u32, String)>,
}

impl EventEmitter {
    fn new() -> Self {
        Self { open_call: None }
    }

    fn ingest(&mut self, resp: &StreamResponse) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        let Some(choice) = resp.choices.first() else {
            return events;
        };

        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                events.push(ProviderEvent::TextDelta {
                    content: content.clone(),
                });
            }
        }

        for tc in choice.delta.tool_calls.as_deref().unwrap_or_default() {
            match &self.open_call {
                Some((open_index, open_id)) if *open_index != tc.index => {
                    // A fragment for a new index closes the previous call
                    events.push(ProviderEvent::ToolEnd {
                        call_id: open_id.clone(),
                    });
                    self.open_call = None;
                }
                _ => {}
            }

            if self.open_call.is_none() {
                // First fragment of a call carries its id; synthesize one if
                // the upstream omitted it so bracketing stays intact.
                let call_id = tc
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let name = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                events.push(ProviderEvent::ToolStart {
                    call_id: call_id.clone(),
                    name,
                });
                self.open_call = Some((tc.index, call_id));
            }

            if let Some(func) = &tc.function {
                if let Some(args) = &func.arguments {
                    if !args.is_empty() {
                        if let Some((_, call_id)) = &self.open_call {
                            events.push(ProviderEvent::ToolDelta {
                                call_id: call_id.clone(),
                                name: func.name.clone(),
                                arguments: args.clone(),
                            });
                        }
                    }
                }
            }
        }

        if choice.finish_reason.as_deref() == Some("tool_calls") {
            if let Some((_, call_id)) = self.open_call.take() {
                events.push(ProviderEvent::ToolEnd { call_id });
            }
        }

        events
    }
}

// --- Upstream API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &str) -> StreamResponse {
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn deepseek_constructor() {
        let provider = OpenAiCompatProvider::deepseek("sk-test").unwrap();
        assert_eq!(provider.name, "deepseek");
        assert!(provider.base_url.contains("api.deepseek.com"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", r#"{"success":true}"#);
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "create_task".into(),
            description: "Create a learning task".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "create_task");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn parse_stream_content_delta() {
        let parsed = chunk(r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn emitter_text_delta() {
        let mut emitter = EventEmitter::new();
        let events =
            emitter.ingest(&chunk(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProviderEvent::TextDelta { content } if content == "Hi"));
    }

    #[test]
    fn emitter_brackets_single_tool_call() {
        let mut emitter = EventEmitter::new();

        let mut events = emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"create_task","arguments":""}}]},"finish_reason":null}]}"#,
        ));
        events.extend(emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"title\":\"x\"}"}}]},"finish_reason":null}]}"#,
        )));
        events.extend(emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        )));

        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["tool_start", "tool_delta", "tool_end"]);
        match &events[0] {
            ProviderEvent::ToolStart { call_id, name } => {
                assert_eq!(call_id, "call_a");
                assert_eq!(name, "create_task");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &events[2] {
            ProviderEvent::ToolEnd { call_id } => assert_eq!(call_id, "call_a"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn emitter_closes_call_on_next_index() {
        let mut emitter = EventEmitter::new();

        let mut events = emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"create_task","arguments":"{}"}}]},"finish_reason":null}]}"#,
        ));
        events.extend(emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"query_knowledge","arguments":"{}"}}]},"finish_reason":null}]}"#,
        )));
        events.extend(emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        )));

        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "tool_start",
                "tool_delta",
                "tool_end",
                "tool_start",
                "tool_delta",
                "tool_end"
            ]
        );
    }

    #[test]
    fn emitter_leaves_unfinished_call_open() {
        let mut emitter = EventEmitter::new();
        let events = emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"create_task","arguments":"{\"ti"}}]},"finish_reason":null}]}"#,
        ));
        // No finish_reason, no later index: the call stays open
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["tool_start", "tool_delta"]);
        assert!(emitter.open_call.is_some());
    }

    #[test]
    fn emitter_synthesizes_missing_call_id() {
        let mut emitter = EventEmitter::new();
        let events = emitter.ingest(&chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"create_task","arguments":""}}]},"finish_reason":null}]}"#,
        ));
        match &events[0] {
            ProviderEvent::ToolStart { call_id, .. } => assert!(call_id.starts_with("call_")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_error_mapping() {
        assert!(matches!(
            OpenAiCompatProvider::status_error(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            OpenAiCompatProvider::status_error(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        match OpenAiCompatProvider::status_error(500, "upstream down".into()) {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 500);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_stream_usage() {
        let parsed = chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.total_tokens, 15);
    }
}
