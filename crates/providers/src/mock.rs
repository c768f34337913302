//! Scripted provider for tests and offline development.
//!
//! Turns are queued up front and consumed one per call. With no script
//! queued the mock answers with a canned text reply, so a dev loop without
//! an API key still works end to end.

use async_trait::async_trait;
use mentor_core::error::ProviderError;
use mentor_core::message::Message;
use mentor_core::provider::*;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted streaming turn.
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    pub events: Vec<ProviderEvent>,
}

pub struct MockProvider {
    streams: Mutex<VecDeque<ScriptedStream>>,
    responses: Mutex<VecDeque<Message>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a scripted event stream for the next `chat_stream` call.
    pub fn push_stream(&self, events: Vec<ProviderEvent>) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(ScriptedStream { events });
        }
    }

    /// Queue an assistant message for the next `chat` call.
    pub fn push_response(&self, message: Message) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(message);
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl mentor_core::Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let message = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Message::assistant("好的，我记下了。"));

        Ok(ProviderResponse {
            message,
            usage: Some(Usage::default()),
            model: request.model,
        })
    }

    async fn chat_stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderStream, ProviderError> {
        let script = self
            .streams
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| ScriptedStream {
                events: vec![
                    ProviderEvent::TextDelta {
                        content: "好的，我记下了。".into(),
                    },
                    ProviderEvent::Done { usage: None },
                ],
            });

        let _ = request;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for event in script.events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::Provider;

    #[tokio::test]
    async fn scripted_stream_replays_in_order() {
        let mock = MockProvider::new();
        mock.push_stream(vec![
            ProviderEvent::TextDelta {
                content: "thinking".into(),
            },
            ProviderEvent::ToolStart {
                call_id: "call_1".into(),
                name: "create_task".into(),
            },
            ProviderEvent::ToolDelta {
                call_id: "call_1".into(),
                name: None,
                arguments: r#"{"title":"review"}"#.into(),
            },
            ProviderEvent::ToolEnd {
                call_id: "call_1".into(),
            },
            ProviderEvent::Done { usage: None },
        ]);

        let mut rx = mock
            .chat_stream(ProviderRequest::new("mock-model", vec![Message::user("hi")]))
            .await
            .unwrap();

        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.unwrap().event_type());
        }
        assert_eq!(
            types,
            vec!["text_delta", "tool_start", "tool_delta", "tool_end", "done"]
        );
    }

    #[tokio::test]
    async fn scripted_response_consumed_once() {
        let mock = MockProvider::new();
        mock.push_response(Message::assistant("first"));

        let req = ProviderRequest::new("mock-model", vec![Message::user("hi")]);
        let first = mock.chat(req.clone()).await.unwrap();
        assert_eq!(first.message.content, "first");

        // Queue exhausted: falls back to the canned reply
        let second = mock.chat(req).await.unwrap();
        assert_ne!(second.message.content, "first");
    }
}
