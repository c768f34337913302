//! Tool execution as a total function.
//!
//! Every invocation produces a [`ToolResult`], never a propagated error:
//! unknown tools, invalid arguments, handler failures, and timeouts all
//! become failed results the model can read and recover from. Tools that
//! require confirmation are parked in the gate instead of running.

use mentor_core::error::ToolError;
use mentor_core::tool::{validate_arguments, ToolContext, ToolInvocation, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::confirm::ConfirmationGate;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    gate: Arc<ConfirmationGate>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ConfirmationGate>, timeout: Duration) -> Self {
        Self {
            registry,
            gate,
            timeout,
        }
    }

    /// Execute one invocation. Confirmation-gated tools are deferred.
    pub async fn execute(&self, invocation: ToolInvocation, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.registry.get(&invocation.name) else {
            warn!(tool = %invocation.name, "Unknown tool requested");
            return ToolResult::failure(
                invocation.name.clone(),
                format!("Tool '{}' does not exist", invocation.name),
                Some("Use one of the registered tools".into()),
            );
        };

        if tool.requires_confirmation() {
            let summary = serde_json::json!({
                "tool": invocation.name,
                "arguments": invocation.arguments,
            });
            let name = invocation.name.clone();
            let action_id = self.gate.propose(ctx.user_id, ctx.session_id, invocation);
            return ToolResult::needs_confirmation(name, action_id, summary);
        }

        self.run(invocation, ctx).await
    }

    /// Execute an invocation released by the confirmation gate. Skips the
    /// gate check; the user already approved this exact call.
    pub async fn execute_approved(
        &self,
        invocation: ToolInvocation,
        ctx: &ToolContext,
    ) -> ToolResult {
        if self.registry.get(&invocation.name).is_none() {
            return ToolResult::failure(
                invocation.name.clone(),
                format!("Tool '{}' does not exist", invocation.name),
                None,
            );
        }
        self.run(invocation, ctx).await
    }

    async fn run(&self, invocation: ToolInvocation, ctx: &ToolContext) -> ToolResult {
        // Registry presence checked by both callers
        let Some(tool) = self.registry.get(&invocation.name) else {
            return ToolResult::failure(invocation.name, "Tool disappeared from registry", None);
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &invocation.arguments) {
            warn!(tool = %invocation.name, %reason, "Invalid tool arguments");
            return ToolResult::failure(
                invocation.name,
                format!("Invalid arguments: {reason}"),
                Some("Check the argument names and types against the tool schema".into()),
            );
        }

        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            tool.execute(invocation.arguments.clone(), ctx),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => {
                info!(
                    tool = %invocation.name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed"
                );
                ToolResult::ok(invocation.name, output)
            }
            Ok(Err(e)) => {
                warn!(tool = %invocation.name, error = %e, "Tool execution failed");
                let suggestion = match &e {
                    ToolError::InvalidArguments(_) => {
                        Some("Check the argument names and types".to_string())
                    }
                    ToolError::NotFound(what) => Some(format!("'{what}' was not found")),
                    _ => None,
                };
                ToolResult::failure(invocation.name, e.to_string(), suggestion)
            }
            Err(_) => {
                warn!(
                    tool = %invocation.name,
                    timeout_secs = self.timeout.as_secs(),
                    "Tool timed out"
                );
                ToolResult::failure(
                    invocation.name.clone(),
                    ToolError::Timeout {
                        tool_name: invocation.name,
                        timeout_secs: self.timeout.as_secs(),
                    }
                    .to_string(),
                    Some("Try again or narrow the request".into()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mentor_core::tool::{Tool, ToolCategory, ToolOutput};
    use serde_json::json;
    use uuid::Uuid;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps forever"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Planning
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::default())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Planning
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "failing".into(),
                reason: "database unavailable".into(),
            })
        }
    }

    struct GatedTool;

    #[async_trait]
    impl Tool for GatedTool {
        fn name(&self) -> &str {
            "gated"
        }
        fn description(&self) -> &str {
            "Needs approval"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Task
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        fn requires_confirmation(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::with_data(json!({"ran": true})))
        }
    }

    fn executor(timeout: Duration) -> (ToolExecutor, Arc<ConfirmationGate>) {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(FailingTool));
        registry.register(Box::new(GatedTool));
        let gate = Arc::new(ConfirmationGate::new(Duration::from_secs(300)));
        (
            ToolExecutor::new(Arc::new(registry), gate.clone(), timeout),
            gate,
        )
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: Uuid::new_v4(),
            session_id: mentor_core::message::SessionId::new(),
        }
    }

    fn invocation(name: &str) -> ToolInvocation {
        ToolInvocation {
            call_id: "call_1".into(),
            name: name.into(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let (exec, _) = executor(Duration::from_secs(5));
        let result = exec.execute(invocation("nonexistent"), &ctx()).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn handler_error_is_a_failed_result() {
        let (exec, _) = executor(Duration::from_secs(5));
        let result = exec.execute(invocation("failing"), &ctx()).await;
        assert!(!result.success);
        assert!(result
            .error_message
            .unwrap()
            .contains("database unavailable"));
    }

    #[tokio::test]
    async fn timeout_is_a_failed_result() {
        let (exec, _) = executor(Duration::from_millis(10));
        let result = exec.execute(invocation("slow"), &ctx()).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn gated_tool_is_deferred_not_run() {
        let (exec, gate) = executor(Duration::from_secs(5));
        let result = exec.execute(invocation("gated"), &ctx()).await;
        assert!(result.requires_confirmation);
        assert!(!result.success);
        assert!(result.confirmation_id.is_some());
        assert_eq!(gate.pending_count(), 1);
    }

    #[tokio::test]
    async fn approved_invocation_runs_the_gated_tool() {
        let (exec, _) = executor(Duration::from_secs(5));
        let result = exec.execute_approved(invocation("gated"), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["ran"], true);
    }
}
