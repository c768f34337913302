//! Core domain types and traits for the Mentor learning assistant.
//!
//! Everything in this crate is transport-agnostic: messages and transcripts,
//! tool invocations and results, the provider abstraction with its streaming
//! fragment protocol, and the store traits the rest of the workspace
//! implements or consumes.

pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use message::{Message, MessageToolCall, Role, SessionId, Transcript};
pub use provider::{
    Provider, ProviderEvent, ProviderRequest, ProviderResponse, ProviderStream, ToolDefinition,
    Usage,
};
pub use store::{
    KnowledgeEdge, KnowledgeNode, KnowledgeStore, NewTask, Task, TaskKind, TaskStatus, TaskStore,
    TranscriptStore,
};
pub use tool::{
    Tool, ToolCategory, ToolContext, ToolInvocation, ToolOutput, ToolRegistry, ToolResult,
};
