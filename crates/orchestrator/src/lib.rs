//! Chat orchestration for Mentor.
//!
//! Turns a raw provider stream into an executed, persisted chat turn:
//! the aggregator reassembles tool-call fragments, the executor runs tools
//! as total functions, the composer folds results back into the transcript,
//! and the confirmation gate holds destructive calls until the user
//! approves them.

pub mod aggregator;
pub mod chat;
pub mod composer;
pub mod confirm;
pub mod executor;
pub mod history;
pub mod prompts;
pub mod stream_event;

pub use aggregator::{AggregatorReport, ChunkAggregator, PushOutcome};
pub use chat::{ChatOrchestrator, ChatRequest, ConfirmResolution};
pub use composer::{ChatResponse, ChatWidget, ResponseComposer, ToolErrorSummary};
pub use confirm::{ConfirmOutcome, ConfirmationGate};
pub use executor::ToolExecutor;
pub use history::HistoryAssembler;
pub use stream_event::ChatStreamEvent;
