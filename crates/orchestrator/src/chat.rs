//! The chat turn loop.
//!
//! One turn: assemble history, call the provider with tools advertised,
//! execute whatever tools the model asked for, make one tool-free
//! continuation call so the model can read the results, persist the whole
//! exchange. The streaming variant runs the same loop in a spawned task and
//! forwards progress as [`ChatStreamEvent`]s; dropping the receiver stops
//! the task at the next send.

use mentor_config::AppConfig;
use mentor_core::error::Result;
use mentor_core::message::{Message, MessageToolCall, SessionId};
use mentor_core::provider::{Provider, ProviderRequest};
use mentor_core::store::TranscriptStore;
use mentor_core::tool::{ToolContext, ToolInvocation, ToolRegistry, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::{ChunkAggregator, PushOutcome};
use crate::composer::{ChatResponse, ResponseComposer};
use crate::confirm::{ConfirmOutcome, ConfirmationGate};
use crate::executor::ToolExecutor;
use crate::history::HistoryAssembler;
use crate::stream_event::ChatStreamEvent;

/// One incoming chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub user_id: Uuid,
    /// Omitted on the first message of a new session
    pub session_id: Option<SessionId>,
    pub message: String,
}

/// Outcome of resolving a pending confirmation.
#[derive(Debug, Serialize)]
pub struct ConfirmResolution {
    /// "executed", "cancelled", "expired", or "not_found"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

pub struct ChatOrchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    gate: Arc<ConfirmationGate>,
    transcripts: Arc<dyn TranscriptStore>,
    history: HistoryAssembler,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        transcripts: Arc<dyn TranscriptStore>,
        config: &AppConfig,
    ) -> Self {
        let gate = Arc::new(ConfirmationGate::new(Duration::from_secs(
            config.orchestrator.confirmation_ttl_secs,
        )));
        let executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            gate.clone(),
            Duration::from_secs(config.orchestrator.tool_timeout_secs),
        ));
        let history =
            HistoryAssembler::new(transcripts.clone(), config.orchestrator.history_window);

        Self {
            provider,
            registry,
            executor,
            gate,
            transcripts,
            history,
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn base_request(&self, messages: Vec<Message>) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.model.clone(), messages)
            .with_tools(self.registry.definitions());
        request.temperature = Some(self.temperature);
        request.max_tokens = Some(self.max_tokens);
        request
    }

    /// One buffered chat turn.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let session_id = req.session_id.unwrap_or_default();
        let ctx = ToolContext {
            user_id: req.user_id,
            session_id,
        };

        let messages = self
            .history
            .assemble(req.user_id, session_id, &req.message)
            .await?;
        let request = self.base_request(messages);

        let response = self.provider.chat(request.clone()).await?;

        // Messages of this turn, persisted together at the end
        let mut turn: Vec<Message> = vec![Message::user(&req.message)];

        let tool_calls = response.message.tool_calls.clone();
        if tool_calls.is_empty() {
            let content = response.message.content.clone();
            turn.push(response.message);
            self.transcripts
                .append_turn(req.user_id, session_id, &turn)
                .await?;
            return Ok(ResponseComposer::compose(
                session_id.to_string(),
                content,
                vec![],
            ));
        }

        let assistant_msg =
            ResponseComposer::tool_call_message(&response.message.content, tool_calls.clone());
        let mut continuation = request.messages.clone();
        continuation.push(assistant_msg.clone());
        turn.push(assistant_msg);

        let mut results = Vec::with_capacity(tool_calls.len());
        for tc in &tool_calls {
            // A call whose arguments do not parse still gets a failed
            // result, so the user and the model both see what went wrong
            let result = match serde_json::from_str(&tc.arguments) {
                Ok(arguments) => {
                    self.executor
                        .execute(
                            ToolInvocation {
                                call_id: tc.id.clone(),
                                name: tc.name.clone(),
                                arguments,
                            },
                            &ctx,
                        )
                        .await
                }
                Err(e) => {
                    warn!(call_id = %tc.id, tool = %tc.name, error = %e, "Malformed tool call arguments");
                    malformed_result(&tc.name, &e.to_string())
                }
            };
            let msg = ResponseComposer::tool_result_message(&tc.id, &result)?;
            continuation.push(msg.clone());
            turn.push(msg);
            results.push(result);
        }

        let mut cont_request = self.base_request(continuation);
        cont_request.tools = Vec::new();
        let final_response = self.provider.continue_with_tool_results(cont_request).await?;

        let content = final_response.message.content.clone();
        turn.push(final_response.message);
        self.transcripts
            .append_turn(req.user_id, session_id, &turn)
            .await?;

        info!(session = %session_id, tools = results.len(), "Chat turn completed");
        Ok(ResponseComposer::compose(
            session_id.to_string(),
            content,
            results,
        ))
    }

    /// Streaming chat turn. Events arrive on the returned receiver; the
    /// turn runs to completion in a background task.
    pub async fn chat_stream(&self, req: ChatRequest) -> mpsc::Receiver<ChatStreamEvent> {
        let (tx, rx) = mpsc::channel::<ChatStreamEvent>(128);

        let provider = self.provider.clone();
        let executor = self.executor.clone();
        let transcripts = self.transcripts.clone();
        let history = self.history.clone();
        let session_id = req.session_id.unwrap_or_default();
        let user_id = req.user_id;
        let user_message = req.message.clone();
        let model = self.model.clone();
        let temperature = self.temperature;
        let max_tokens = self.max_tokens;
        let tool_defs = self.registry.definitions();

        tokio::spawn(async move {
            let ctx = ToolContext {
                user_id,
                session_id,
            };

            let messages = match history.assemble(user_id, session_id, &user_message).await {
                Ok(m) => m,
                Err(e) => {
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut request =
                ProviderRequest::new(model.clone(), messages).with_tools(tool_defs);
            request.temperature = Some(temperature);
            request.max_tokens = Some(max_tokens);

            let mut stream = match provider.chat_stream(request.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut aggregator = ChunkAggregator::new();
            let mut full_content = String::new();
            let mut usage = None;
            let mut wire_calls: Vec<MessageToolCall> = Vec::new();
            let mut results: Vec<(String, ToolResult)> = Vec::new();

            while let Some(event) = stream.recv().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        let _ = tx
                            .send(ChatStreamEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                match &event {
                    mentor_core::ProviderEvent::TextDelta { content } => {
                        full_content.push_str(content);
                        if tx
                            .send(ChatStreamEvent::Text {
                                content: content.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return; // client went away
                        }
                    }
                    mentor_core::ProviderEvent::Done { usage: u } => {
                        usage = *u;
                        break;
                    }
                    _ => match aggregator.push(&event) {
                        // Only announced once the aggregator accepts the
                        // call, so a replayed start stays invisible
                        Some(PushOutcome::Opened { call_id, name }) => {
                            let _ = tx
                                .send(ChatStreamEvent::ToolStart { call_id, name })
                                .await;
                        }
                        // A closed call executes immediately, in the order
                        // calls complete on the wire
                        Some(PushOutcome::Completed(invocation)) => {
                            let call_id = invocation.call_id.clone();
                            wire_calls.push(MessageToolCall {
                                id: call_id.clone(),
                                name: invocation.name.clone(),
                                arguments: invocation.arguments.to_string(),
                            });

                            let result = executor.execute(invocation, &ctx).await;
                            if let (Some(wt), Some(wd)) =
                                (&result.widget_type, &result.widget_data)
                            {
                                let _ = tx
                                    .send(ChatStreamEvent::Widget {
                                        widget_type: wt.clone(),
                                        data: wd.clone(),
                                    })
                                    .await;
                            }
                            if tx
                                .send(ChatStreamEvent::ToolResult {
                                    call_id: call_id.clone(),
                                    result: result.clone(),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            results.push((call_id, result));
                        }
                        // Unparseable arguments still produce a visible
                        // failed result the model can correct from
                        Some(PushOutcome::Malformed {
                            call_id,
                            name,
                            raw_arguments,
                            error,
                        }) => {
                            wire_calls.push(MessageToolCall {
                                id: call_id.clone(),
                                name: name.clone(),
                                arguments: raw_arguments,
                            });

                            let result = malformed_result(&name, &error);
                            if tx
                                .send(ChatStreamEvent::ToolResult {
                                    call_id: call_id.clone(),
                                    result: result.clone(),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            results.push((call_id, result));
                        }
                        None => {}
                    },
                }
            }

            let report = aggregator.finish();
            if !report.unterminated.is_empty() {
                warn!(
                    unterminated = report.unterminated.len(),
                    "Dropped unterminated tool calls this turn"
                );
            }

            let mut turn: Vec<Message> = vec![Message::user(&user_message)];

            if wire_calls.is_empty() {
                turn.push(Message::assistant(&full_content));
                if let Err(e) = transcripts.append_turn(user_id, session_id, &turn).await {
                    warn!(error = %e, "Failed to persist chat turn");
                }
                let _ = tx
                    .send(ChatStreamEvent::Done {
                        session_id: session_id.to_string(),
                        usage,
                    })
                    .await;
                return;
            }

            // Fold tool activity into the transcript and ask for the
            // closing answer with tools disabled
            let assistant_msg = ResponseComposer::tool_call_message(&full_content, wire_calls);
            let mut continuation = request.messages.clone();
            continuation.push(assistant_msg.clone());
            turn.push(assistant_msg);

            for (call_id, result) in &results {
                match ResponseComposer::tool_result_message(call_id, result) {
                    Ok(msg) => {
                        continuation.push(msg.clone());
                        turn.push(msg);
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize tool result"),
                }
            }

            let mut cont_request = ProviderRequest::new(model, continuation);
            cont_request.temperature = Some(temperature);
            cont_request.max_tokens = Some(max_tokens);

            match provider.continue_with_tool_results(cont_request).await {
                Ok(final_response) => {
                    if !final_response.message.content.is_empty()
                        && tx
                            .send(ChatStreamEvent::Text {
                                content: final_response.message.content.clone(),
                            })
                            .await
                            .is_err()
                    {
                        return;
                    }
                    if let Some(u) = final_response.usage {
                        usage = Some(u);
                    }
                    turn.push(final_response.message);
                }
                Err(e) => {
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            }

            if let Err(e) = transcripts.append_turn(user_id, session_id, &turn).await {
                warn!(error = %e, "Failed to persist chat turn");
            }

            let _ = tx
                .send(ChatStreamEvent::Done {
                    session_id: session_id.to_string(),
                    usage,
                })
                .await;
        });

        rx
    }

    /// Resolve a pending confirmation; an approval executes the parked call
    /// and persists the result to the proposing session's transcript.
    pub async fn confirm(
        &self,
        user_id: Uuid,
        action_id: &str,
        confirmed: bool,
    ) -> ConfirmResolution {
        match self.gate.resolve(user_id, action_id, confirmed) {
            ConfirmOutcome::Approved {
                invocation,
                session_id,
            } => {
                let ctx = ToolContext {
                    user_id,
                    session_id,
                };
                let call_id = invocation.call_id.clone();
                let wire_call = MessageToolCall {
                    id: call_id.clone(),
                    name: invocation.name.clone(),
                    arguments: invocation.arguments.to_string(),
                };
                let result = self.executor.execute_approved(invocation, &ctx).await;

                // The approved call lands in the transcript the same way an
                // ungated round does, so the model sees it on the next turn
                let mut turn = vec![ResponseComposer::tool_call_message("", vec![wire_call])];
                match ResponseComposer::tool_result_message(&call_id, &result) {
                    Ok(msg) => turn.push(msg),
                    Err(e) => warn!(error = %e, "Failed to serialize confirmed tool result"),
                }
                if let Err(e) = self
                    .transcripts
                    .append_turn(user_id, session_id, &turn)
                    .await
                {
                    warn!(error = %e, "Failed to persist confirmed tool round");
                }

                ConfirmResolution {
                    status: "executed",
                    result: Some(result),
                }
            }
            ConfirmOutcome::Rejected => ConfirmResolution {
                status: "cancelled",
                result: None,
            },
            ConfirmOutcome::Expired => ConfirmResolution {
                status: "expired",
                result: None,
            },
            ConfirmOutcome::NotFound => ConfirmResolution {
                status: "not_found",
                result: None,
            },
        }
    }
}

/// The failed result for a call whose arguments never parsed as JSON.
fn malformed_result(name: &str, error: &str) -> ToolResult {
    ToolResult::failure(
        name,
        format!("Tool call arguments were not valid JSON: {error}"),
        Some("Re-issue the call with well-formed JSON arguments".into()),
    )
}
