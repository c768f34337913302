//! Persistence traits and the records they move.
//!
//! Three narrow store traits instead of one wide repository: transcripts,
//! tasks, and the knowledge graph evolve independently and the in-memory and
//! sqlite backends implement them separately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{Message, SessionId};

/// What kind of learning task this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Study,
    Review,
    Practice,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Study => "study",
            TaskKind::Review => "review",
            TaskKind::Practice => "practice",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "study" => Ok(TaskKind::Study),
            "review" => Ok(TaskKind::Review),
            "practice" => Ok(TaskKind::Practice),
            other => Err(format!("Unknown task kind: {other}")),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("Unknown task status: {other}")),
        }
    }
}

/// A persisted learning task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a task. The store assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: TaskKind,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

/// A node in the user's knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A directed, labelled edge between two knowledge nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub id: Uuid,
    pub from_node: Uuid,
    pub to_node: Uuid,
    /// Relationship label (e.g. "prerequisite_of", "related_to")
    pub relation: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation history persistence.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Append the messages of one completed turn, in order.
    async fn append_turn(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        messages: &[Message],
    ) -> std::result::Result<(), StoreError>;

    /// The most recent `limit` messages for a session, oldest first.
    async fn recent_turns(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StoreError>;
}

/// Learning task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        task: NewTask,
    ) -> std::result::Result<Task, StoreError>;

    async fn get(&self, user_id: Uuid, id: Uuid) -> std::result::Result<Task, StoreError>;

    async fn update_status(
        &self,
        user_id: Uuid,
        id: Uuid,
        status: TaskStatus,
    ) -> std::result::Result<Task, StoreError>;

    /// The most recently created tasks for a user, newest first.
    async fn recent(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> std::result::Result<Vec<Task>, StoreError>;
}

/// Knowledge graph persistence.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_node(
        &self,
        user_id: Uuid,
        title: String,
        content: Option<String>,
        tags: Vec<String>,
    ) -> std::result::Result<KnowledgeNode, StoreError>;

    async fn get_node(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> std::result::Result<KnowledgeNode, StoreError>;

    /// Case-insensitive substring search over titles and tags.
    async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<KnowledgeNode>, StoreError>;

    /// Link two existing nodes. Both must belong to `user_id`.
    async fn link(
        &self,
        user_id: Uuid,
        from_node: Uuid,
        to_node: Uuid,
        relation: String,
    ) -> std::result::Result<KnowledgeEdge, StoreError>;

    /// All edges touching the given node, in either direction.
    async fn edges_of(
        &self,
        user_id: Uuid,
        node: Uuid,
    ) -> std::result::Result<Vec<KnowledgeEdge>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_roundtrip() {
        for kind in [TaskKind::Study, TaskKind::Review, TaskKind::Practice] {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("quiz".parse::<TaskKind>().is_err());
    }

    #[test]
    fn task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn new_task_deserializes_with_defaults() {
        let task: NewTask =
            serde_json::from_str(r#"{"title":"复习高数第三章","kind":"review"}"#).unwrap();
        assert_eq!(task.kind, TaskKind::Review);
        assert!(task.description.is_none());
        assert!(task.due_date.is_none());
    }
}
