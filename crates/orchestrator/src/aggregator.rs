//! Reassembles streamed tool-call fragments into complete invocations.
//!
//! Providers emit a tool call as a `ToolStart`, any number of `ToolDelta`s,
//! and a `ToolEnd`. The aggregator buffers argument fragments per call and
//! promotes the call exactly once, when it closes. A call that closes with
//! unparseable arguments is surfaced as [`PushOutcome::Malformed`] so the
//! turn can report the failure; fragments for unknown calls, duplicate call
//! ids, and calls the stream never closed are dropped with a log.

use mentor_core::provider::ProviderEvent;
use mentor_core::tool::ToolInvocation;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// An in-flight tool call whose arguments are still streaming.
struct OpenCall {
    name: String,
    arguments: String,
}

/// What pushing one provider event did to the calls being assembled.
#[derive(Debug)]
pub enum PushOutcome {
    /// A new call was accepted; argument fragments will follow.
    Opened { call_id: String, name: String },
    /// A call closed with parseable arguments.
    Completed(ToolInvocation),
    /// A call closed but its buffered arguments were not valid JSON. The
    /// raw text is kept so the transcript can still show what was sent.
    Malformed {
        call_id: String,
        name: String,
        raw_arguments: String,
        error: String,
    },
}

/// Summary of what the aggregator discarded over one stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AggregatorReport {
    /// Calls that closed with unparseable argument JSON
    pub malformed: usize,
    /// Call ids the stream never closed
    pub unterminated: Vec<String>,
}

#[derive(Default)]
pub struct ChunkAggregator {
    open: HashMap<String, OpenCall>,
    completed: HashSet<String>,
    malformed: usize,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one provider event. Returns an outcome when the event opens a
    /// fresh call or closes a buffered one.
    ///
    /// Text and `Done` events are not the aggregator's concern and always
    /// return `None`.
    pub fn push(&mut self, event: &ProviderEvent) -> Option<PushOutcome> {
        match event {
            ProviderEvent::ToolStart { call_id, name } => {
                if self.completed.contains(call_id) || self.open.contains_key(call_id) {
                    warn!(call_id, "Duplicate tool_start, ignoring");
                    return None;
                }
                self.open.insert(
                    call_id.clone(),
                    OpenCall {
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
                Some(PushOutcome::Opened {
                    call_id: call_id.clone(),
                    name: name.clone(),
                })
            }
            ProviderEvent::ToolDelta {
                call_id,
                name,
                arguments,
            } => {
                let Some(call) = self.open.get_mut(call_id) else {
                    warn!(call_id, "Fragment for unknown tool call, dropping");
                    return None;
                };
                // Later deltas may correct the name: last write wins
                if let Some(name) = name {
                    call.name = name.clone();
                }
                call.arguments.push_str(arguments);
                None
            }
            ProviderEvent::ToolEnd { call_id } => {
                let Some(call) = self.open.remove(call_id) else {
                    warn!(call_id, "tool_end for unknown call, ignoring");
                    return None;
                };
                self.completed.insert(call_id.clone());

                let raw = if call.arguments.trim().is_empty() {
                    // No arguments at all is a valid empty-object call
                    "{}"
                } else {
                    call.arguments.as_str()
                };

                match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(arguments) => {
                        debug!(call_id, tool = %call.name, "Tool call assembled");
                        Some(PushOutcome::Completed(ToolInvocation {
                            call_id: call_id.clone(),
                            name: call.name,
                            arguments,
                        }))
                    }
                    Err(e) => {
                        warn!(
                            call_id,
                            tool = %call.name,
                            error = %e,
                            "Tool call closed with malformed arguments"
                        );
                        self.malformed += 1;
                        Some(PushOutcome::Malformed {
                            call_id: call_id.clone(),
                            name: call.name,
                            raw_arguments: call.arguments,
                            error: e.to_string(),
                        })
                    }
                }
            }
            ProviderEvent::TextDelta { .. } | ProviderEvent::Done { .. } => None,
        }
    }

    /// Consume the aggregator at end of stream and report what was dropped.
    pub fn finish(self) -> AggregatorReport {
        let unterminated: Vec<String> = self.open.keys().cloned().collect();
        for call_id in &unterminated {
            warn!(call_id, "Stream ended with unterminated tool call, dropping");
        }
        AggregatorReport {
            malformed: self.malformed,
            unterminated,
        }
    }
}
