//! Tool trait, registry, and invocation/result types.
//!
//! Tools are the assistant's hands: create learning tasks, query the
//! knowledge graph, update task status. The registry is built once at
//! startup, is immutable afterwards, and is shared across requests behind an
//! `Arc` without further synchronization.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ToolError;
use crate::message::SessionId;
use crate::provider::ToolDefinition;

/// A fully-reconstructed, parsed request to run one tool.
///
/// Produced at most once per `call_id` — either by the chunk aggregator when
/// the provider signals end-of-call, or directly from a buffered response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique call ID (matches the provider's tool_call id)
    pub call_id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as parsed JSON
    pub arguments: serde_json::Value,
}

/// The normalized outcome of one tool invocation.
///
/// This is a total-function result: every execution path — unknown tool,
/// bad arguments, handler fault, timeout, deferred confirmation — produces
/// one of these, never a propagated fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Which tool this result is for
    pub tool_name: String,

    /// Structured payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Human-readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Hint for the model (or user) on how to recover from a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// UI widget kind to render for this result (e.g. "task_card")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,

    /// Payload for the widget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_data: Option<serde_json::Value>,

    /// True when the invocation was deferred pending user approval.
    /// Implies no side effect has occurred yet.
    #[serde(default)]
    pub requires_confirmation: bool,

    /// The pending-confirmation action id, when deferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
}

impl ToolResult {
    /// A successful result carrying the handler's output.
    pub fn ok(tool_name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            success: true,
            tool_name: tool_name.into(),
            data: output.data,
            error_message: None,
            suggestion: None,
            widget_type: output.widget_type,
            widget_data: output.widget_data,
            requires_confirmation: false,
            confirmation_id: None,
        }
    }

    /// A failed result with an optional recovery hint.
    pub fn failure(
        tool_name: impl Into<String>,
        error_message: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            success: false,
            tool_name: tool_name.into(),
            data: None,
            error_message: Some(error_message.into()),
            suggestion,
            widget_type: None,
            widget_data: None,
            requires_confirmation: false,
            confirmation_id: None,
        }
    }

    /// A deferred result: the side effect has not happened and will only run
    /// after the user confirms the action.
    pub fn needs_confirmation(
        tool_name: impl Into<String>,
        action_id: impl Into<String>,
        summary: serde_json::Value,
    ) -> Self {
        Self {
            success: false,
            tool_name: tool_name.into(),
            data: Some(summary),
            error_message: None,
            suggestion: None,
            widget_type: None,
            widget_data: None,
            requires_confirmation: true,
            confirmation_id: Some(action_id.into()),
        }
    }
}

/// What a tool handler returns on success; the executor wraps it into a
/// [`ToolResult`].
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub data: Option<serde_json::Value>,
    pub widget_type: Option<String>,
    pub widget_data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn widget(mut self, widget_type: impl Into<String>, widget_data: serde_json::Value) -> Self {
        self.widget_type = Some(widget_type.into());
        self.widget_data = Some(widget_data);
        self
    }
}

/// Request-scoped context passed to every tool handler.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    /// The authenticated user on whose behalf the tool runs
    pub user_id: Uuid,
    /// The session the invoking turn belongs to
    pub session_id: SessionId,
}

/// Capability tag for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Task management (create/update/batch)
    Task,
    /// Knowledge graph operations
    Knowledge,
    /// Study planning
    Planning,
}

/// The core Tool trait.
///
/// Each handler (create_task, query_knowledge, ...) implements this trait and
/// is registered in the [`ToolRegistry`] at startup. Handlers hold their own
/// store dependencies; the context only carries per-request identity.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "create_task").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the provider).
    fn description(&self) -> &str;

    /// Capability tag.
    fn category(&self) -> ToolCategory;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether this tool needs explicit user approval before executing.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a definition for the provider.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Built once at process start, then shared read-only. Lookup failure is a
/// normal outcome (the model may hallucinate a name), never a panic.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Export all tool definitions in the provider's declaration format.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate parsed arguments against a tool's JSON schema.
///
/// Checks required-field presence and primitive type tags. The schema set is
/// closed and hand-written, so this covers everything the registry declares.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> std::result::Result<(), String> {
    let Some(obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = props.get(key) else {
            // Unknown fields are tolerated; the model sometimes adds extras.
            continue;
        };
        let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches && !value.is_null() {
            return Err(format!("field '{key}' must be of type {expected}"));
        }
    }

    Ok(())
}
