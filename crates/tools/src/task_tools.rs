//! Learning-task tools: create, update status, batch create.
//!
//! Batch creation is the one destructive-scale operation here and is gated
//! behind user confirmation; the handler itself only runs once the gate
//! releases the call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::error::ToolError;
use mentor_core::store::{NewTask, TaskKind, TaskStatus, TaskStore};
use mentor_core::tool::{Tool, ToolCategory, ToolContext, ToolOutput};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

fn parse_due_date(raw: &Option<String>) -> Result<Option<DateTime<Utc>>, ToolError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    // Accept full RFC3339 or a bare date (taken as midnight UTC)
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(dt.and_utc()));
        }
    }
    Err(ToolError::InvalidArguments(format!(
        "due_date '{raw}' is not an RFC3339 timestamp or YYYY-MM-DD date"
    )))
}

fn task_card(task: &mentor_core::store::Task) -> serde_json::Value {
    json!({
        "task_id": task.id,
        "title": task.title,
        "kind": task.kind,
        "status": task.status,
        "due_date": task.due_date,
    })
}

#[derive(Deserialize)]
struct CreateTaskArgs {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

impl CreateTaskArgs {
    fn into_new_task(self) -> Result<NewTask, ToolError> {
        let kind = match self.kind.as_deref() {
            None => TaskKind::Study,
            Some(raw) => TaskKind::from_str(raw).map_err(ToolError::InvalidArguments)?,
        };
        Ok(NewTask {
            title: self.title,
            description: self.description,
            kind,
            due_date: parse_due_date(&self.due_date)?,
        })
    }
}

pub struct CreateTaskTool {
    store: Arc<dyn TaskStore>,
}

impl CreateTaskTool {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create one learning task. Use when the user wants to plan a single study, review, or practice item."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Task
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Short task title" },
                "description": { "type": "string", "description": "Optional details" },
                "kind": {
                    "type": "string",
                    "enum": ["study", "review", "practice"],
                    "description": "Kind of task, defaults to study"
                },
                "due_date": { "type": "string", "description": "RFC3339 timestamp or YYYY-MM-DD" }
            },
            "required": ["title"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: CreateTaskArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let task = self
            .store
            .create(ctx.user_id, args.into_new_task()?)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "create_task".into(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput::with_data(json!({ "task": task }))
            .widget("task_card", task_card(&task)))
    }
}

#[derive(Deserialize)]
struct UpdateTaskStatusArgs {
    task_id: String,
    status: String,
}

pub struct UpdateTaskStatusTool {
    store: Arc<dyn TaskStore>,
}

impl UpdateTaskStatusTool {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateTaskStatusTool {
    fn name(&self) -> &str {
        "update_task_status"
    }

    fn description(&self) -> &str {
        "Change the status of an existing task (pending, in_progress, completed, cancelled)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Task
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string", "description": "UUID of the task" },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "cancelled"]
                }
            },
            "required": ["task_id", "status"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: UpdateTaskStatusArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let task_id = uuid::Uuid::parse_str(&args.task_id)
            .map_err(|e| ToolError::InvalidArguments(format!("task_id: {e}")))?;
        let status = TaskStatus::from_str(&args.status).map_err(ToolError::InvalidArguments)?;

        let task = self
            .store
            .update_status(ctx.user_id, task_id, status)
            .await
            .map_err(|e| match e {
                mentor_core::StoreError::NotFound(what) => ToolError::NotFound(what),
                other => ToolError::ExecutionFailed {
                    tool_name: "update_task_status".into(),
                    reason: other.to_string(),
                },
            })?;

        Ok(ToolOutput::with_data(json!({ "task": task }))
            .widget("task_card", task_card(&task)))
    }
}

#[derive(Deserialize)]
struct BatchCreateTasksArgs {
    tasks: Vec<CreateTaskArgs>,
}

pub struct BatchCreateTasksTool {
    store: Arc<dyn TaskStore>,
}

impl BatchCreateTasksTool {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for BatchCreateTasksTool {
    fn name(&self) -> &str {
        "batch_create_tasks"
    }

    fn description(&self) -> &str {
        "Create several learning tasks at once, e.g. a whole study plan. The user must confirm before the tasks are created."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Task
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Tasks to create",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "kind": {
                                "type": "string",
                                "enum": ["study", "review", "practice"]
                            },
                            "due_date": { "type": "string" }
                        },
                        "required": ["title"]
                    }
                }
            },
            "required": ["tasks"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: BatchCreateTasksArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.tasks.is_empty() {
            return Err(ToolError::InvalidArguments("tasks must not be empty".into()));
        }

        // All-or-nothing on argument validity, checked before any insert
        let mut new_tasks = Vec::with_capacity(args.tasks.len());
        for task in args.tasks {
            new_tasks.push(task.into_new_task()?);
        }

        let mut created = Vec::with_capacity(new_tasks.len());
        for new_task in new_tasks {
            let task = self
                .store
                .create(ctx.user_id, new_task)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "batch_create_tasks".into(),
                    reason: e.to_string(),
                })?;
            created.push(task);
        }

        let cards: Vec<serde_json::Value> = created.iter().map(task_card).collect();
        Ok(
            ToolOutput::with_data(json!({ "created": created.len(), "tasks": created }))
                .widget("task_list", json!({ "tasks": cards })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_storage::InMemoryStore;
    use uuid::Uuid;

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: Uuid::new_v4(),
            session_id: mentor_core::SessionId::new(),
        }
    }

    #[tokio::test]
    async fn create_task_defaults_to_study() {
        let store = Arc::new(InMemoryStore::new());
        let tool = CreateTaskTool::new(store);
        let out = tool
            .execute(json!({"title": "看完第三章"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.widget_type.as_deref(), Some("task_card"));
        assert_eq!(out.data.unwrap()["task"]["kind"], "study");
    }

    #[tokio::test]
    async fn create_task_with_bare_date() {
        let store = Arc::new(InMemoryStore::new());
        let tool = CreateTaskTool::new(store);
        let out = tool
            .execute(
                json!({"title": "复习", "kind": "review", "due_date": "2026-09-01"}),
                &ctx(),
            )
            .await
            .unwrap();
        let due = out.data.unwrap()["task"]["due_date"].clone();
        assert!(due.as_str().unwrap().starts_with("2026-09-01"));
    }

    #[tokio::test]
    async fn create_task_rejects_bad_kind() {
        let store = Arc::new(InMemoryStore::new());
        let tool = CreateTaskTool::new(store);
        let err = tool
            .execute(json!({"title": "x", "kind": "quiz"}), &ctx())
            .await;
        assert!(matches!(err, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn update_status_roundtrip() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ctx();
        let create = CreateTaskTool::new(store.clone());
        let out = create.execute(json!({"title": "刷题"}), &ctx).await.unwrap();
        let task_id = out.data.unwrap()["task"]["id"].as_str().unwrap().to_string();

        let update = UpdateTaskStatusTool::new(store);
        let out = update
            .execute(json!({"task_id": task_id, "status": "completed"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data.unwrap()["task"]["status"], "completed");
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let tool = UpdateTaskStatusTool::new(store);
        let err = tool
            .execute(
                json!({"task_id": Uuid::new_v4().to_string(), "status": "completed"}),
                &ctx(),
            )
            .await;
        assert!(matches!(err, Err(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn batch_create_is_gated_and_creates_all() {
        let store = Arc::new(InMemoryStore::new());
        let tool = BatchCreateTasksTool::new(store.clone());
        assert!(tool.requires_confirmation());

        let ctx = ctx();
        let out = tool
            .execute(
                json!({"tasks": [
                    {"title": "第一章", "kind": "study"},
                    {"title": "第一章习题", "kind": "practice"}
                ]}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.data.unwrap()["created"], 2);
        assert_eq!(out.widget_type.as_deref(), Some("task_list"));

        let recent = store.recent(ctx.user_id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn batch_create_rejects_empty_list() {
        let store = Arc::new(InMemoryStore::new());
        let tool = BatchCreateTasksTool::new(store);
        let err = tool.execute(json!({"tasks": []}), &ctx()).await;
        assert!(matches!(err, Err(ToolError::InvalidArguments(_))));
    }
}
