//! In-memory store for tests and keyless dev runs.
//!
//! Everything lives in `RwLock`-guarded maps; nothing survives a restart.
//! Implements all three store traits so a single instance can back the
//! whole application.

use async_trait::async_trait;
use chrono::Utc;
use mentor_core::error::StoreError;
use mentor_core::message::{Message, SessionId};
use mentor_core::store::{
    KnowledgeEdge, KnowledgeNode, KnowledgeStore, NewTask, Task, TaskStatus, TaskStore,
    TranscriptStore,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    transcripts: RwLock<HashMap<(Uuid, SessionId), Vec<Message>>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    nodes: RwLock<HashMap<Uuid, KnowledgeNode>>,
    edges: RwLock<Vec<KnowledgeEdge>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryStore {
    async fn append_turn(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut transcripts = self.transcripts.write().await;
        transcripts
            .entry((user_id, session_id))
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn recent_turns(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let transcripts = self.transcripts.read().await;
        let Some(messages) = transcripts.get(&(user_id, session_id)) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, user_id: Uuid, task: NewTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            user_id,
            title: task.title,
            description: task.description,
            kind: task.kind,
            status: TaskStatus::Pending,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .filter(|t| t.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    async fn update_status(
        &self,
        user_id: Uuid,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn recent(&self, user_id: Uuid, limit: usize) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut owned: Vec<Task> = tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        Ok(owned)
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn create_node(
        &self,
        user_id: Uuid,
        title: String,
        content: Option<String>,
        tags: Vec<String>,
    ) -> Result<KnowledgeNode, StoreError> {
        let node = KnowledgeNode {
            id: Uuid::new_v4(),
            user_id,
            title,
            content,
            tags,
            created_at: Utc::now(),
        };
        self.nodes.write().await.insert(node.id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, user_id: Uuid, id: Uuid) -> Result<KnowledgeNode, StoreError> {
        self.nodes
            .read()
            .await
            .get(&id)
            .filter(|n| n.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("knowledge node {id}")))
    }

    async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeNode>, StoreError> {
        let needle = query.to_lowercase();
        let nodes = self.nodes.read().await;
        let mut hits: Vec<KnowledgeNode> = nodes
            .values()
            .filter(|n| n.user_id == user_id)
            .filter(|n| {
                n.title.to_lowercase().contains(&needle)
                    || n.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn link(
        &self,
        user_id: Uuid,
        from_node: Uuid,
        to_node: Uuid,
        relation: String,
    ) -> Result<KnowledgeEdge, StoreError> {
        // Both endpoints must exist and belong to the user
        self.get_node(user_id, from_node).await?;
        self.get_node(user_id, to_node).await?;

        let edge = KnowledgeEdge {
            id: Uuid::new_v4(),
            from_node,
            to_node,
            relation,
            created_at: Utc::now(),
        };
        self.edges.write().await.push(edge.clone());
        Ok(edge)
    }

    async fn edges_of(&self, user_id: Uuid, node: Uuid) -> Result<Vec<KnowledgeEdge>, StoreError> {
        self.get_node(user_id, node).await?;
        let edges = self.edges.read().await;
        Ok(edges
            .iter()
            .filter(|e| e.from_node == node || e.to_node == node)
            .cloned()
            .collect())
    }
}
