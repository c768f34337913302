//! SQLite backend.
//!
//! One database file with four tables:
//! - `chat_messages` — append-only transcript rows
//! - `tasks` — learning tasks
//! - `knowledge_nodes` / `knowledge_edges` — the knowledge graph
//!
//! WAL journaling, foreign keys on, migrations run at connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::error::StoreError;
use mentor_core::message::{Message, MessageToolCall, Role, SessionId};
use mentor_core::store::{
    KnowledgeEdge, KnowledgeNode, KnowledgeStore, NewTask, Task, TaskKind, TaskStatus, TaskStore,
    TranscriptStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      TEXT NOT NULL,
                session_id   TEXT NOT NULL,
                message_id   TEXT NOT NULL,
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                tool_calls   TEXT NOT NULL DEFAULT '[]',
                tool_call_id TEXT,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session
             ON chat_messages(user_id, session_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL,
                description TEXT,
                kind        TEXT NOT NULL,
                status      TEXT NOT NULL,
                due_date    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("tasks table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_nodes (
                id         TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                title      TEXT NOT NULL,
                content    TEXT,
                tags       TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("knowledge_nodes table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_edges (
                id         TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                from_node  TEXT NOT NULL,
                to_node    TEXT NOT NULL,
                relation   TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (from_node) REFERENCES knowledge_nodes(id),
                FOREIGN KEY (to_node) REFERENCES knowledge_nodes(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("knowledge_edges table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let message_id: String = row
            .try_get("message_id")
            .map_err(|e| StoreError::Storage(format!("message_id column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StoreError::Storage(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::Storage(format!("content column: {e}")))?;
        let tool_calls_json: String = row
            .try_get("tool_calls")
            .map_err(|e| StoreError::Storage(format!("tool_calls column: {e}")))?;
        let tool_call_id: Option<String> = row
            .try_get("tool_call_id")
            .map_err(|e| StoreError::Storage(format!("tool_call_id column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Storage(format!("created_at column: {e}")))?;

        let role = Role::from_str(&role_str)
            .map_err(|e| StoreError::Serialization(format!("role: {e}")))?;
        let tool_calls: Vec<MessageToolCall> =
            serde_json::from_str(&tool_calls_json).unwrap_or_default();

        Ok(Message {
            id: message_id,
            role,
            content,
            tool_calls,
            tool_call_id,
            timestamp: Self::parse_timestamp(&created_at),
        })
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::Storage(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::Storage(format!("user_id column: {e}")))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| StoreError::Storage(format!("title column: {e}")))?;
        let description: Option<String> = row
            .try_get("description")
            .map_err(|e| StoreError::Storage(format!("description column: {e}")))?;
        let kind_str: String = row
            .try_get("kind")
            .map_err(|e| StoreError::Storage(format!("kind column: {e}")))?;
        let status_str: String = row
            .try_get("status")
            .map_err(|e| StoreError::Storage(format!("status column: {e}")))?;
        let due_date: Option<String> = row
            .try_get("due_date")
            .map_err(|e| StoreError::Storage(format!("due_date column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Storage(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::Storage(format!("updated_at column: {e}")))?;

        Ok(Task {
            id: Uuid::parse_str(&id)
                .map_err(|e| StoreError::Serialization(format!("task id: {e}")))?,
            user_id: Uuid::parse_str(&user_id)
                .map_err(|e| StoreError::Serialization(format!("user id: {e}")))?,
            title,
            description,
            kind: TaskKind::from_str(&kind_str)
                .map_err(|e| StoreError::Serialization(format!("kind: {e}")))?,
            status: TaskStatus::from_str(&status_str)
                .map_err(|e| StoreError::Serialization(format!("status: {e}")))?,
            due_date: due_date.as_deref().map(Self::parse_timestamp),
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
        })
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeNode, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::Storage(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::Storage(format!("user_id column: {e}")))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| StoreError::Storage(format!("title column: {e}")))?;
        let content: Option<String> = row
            .try_get("content")
            .map_err(|e| StoreError::Storage(format!("content column: {e}")))?;
        let tags_json: String = row
            .try_get("tags")
            .map_err(|e| StoreError::Storage(format!("tags column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Storage(format!("created_at column: {e}")))?;

        Ok(KnowledgeNode {
            id: Uuid::parse_str(&id)
                .map_err(|e| StoreError::Serialization(format!("node id: {e}")))?,
            user_id: Uuid::parse_str(&user_id)
                .map_err(|e| StoreError::Serialization(format!("user id: {e}")))?,
            title,
            content,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            created_at: Self::parse_timestamp(&created_at),
        })
    }

    fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeEdge, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::Storage(format!("id column: {e}")))?;
        let from_node: String = row
            .try_get("from_node")
            .map_err(|e| StoreError::Storage(format!("from_node column: {e}")))?;
        let to_node: String = row
            .try_get("to_node")
            .map_err(|e| StoreError::Storage(format!("to_node column: {e}")))?;
        let relation: String = row
            .try_get("relation")
            .map_err(|e| StoreError::Storage(format!("relation column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Storage(format!("created_at column: {e}")))?;

        Ok(KnowledgeEdge {
            id: Uuid::parse_str(&id)
                .map_err(|e| StoreError::Serialization(format!("edge id: {e}")))?,
            from_node: Uuid::parse_str(&from_node)
                .map_err(|e| StoreError::Serialization(format!("from_node: {e}")))?,
            to_node: Uuid::parse_str(&to_node)
                .map_err(|e| StoreError::Serialization(format!("to_node: {e}")))?,
            relation,
            created_at: Self::parse_timestamp(&created_at),
        })
    }
}

#[async_trait]
impl TranscriptStore for SqliteStore {
    async fn append_turn(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        for message in messages {
            let tool_calls = serde_json::to_string(&message.tool_calls)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO chat_messages
                    (user_id, session_id, message_id, role, content, tool_calls, tool_call_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id.to_string())
            .bind(session_id.to_string())
            .bind(&message.id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(tool_calls)
            .bind(&message.tool_call_id)
            .bind(message.timestamp.to_rfc3339())
            .execute(&mut *txn)
            .await
            .map_err(|e| StoreError::Storage(format!("insert message: {e}")))?;
        }

        txn.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))
    }

    async fn recent_turns(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, role, content, tool_calls, tool_call_id, created_at
            FROM chat_messages
            WHERE user_id = ? AND session_id = ?
            ORDER BY iid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(session_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("select messages: {e}")))?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
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

        sqlx::query(
            r#"
            INSERT INTO tasks (id, user_id, title, description, kind, status, due_date, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.user_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(task.due_date.map(|d| d.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert task: {e}")))?;

        Ok(task)
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Task, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("select task: {e}")))?
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        Self::row_to_task(&row)
    }

    async fn update_status(
        &self,
        user_id: Uuid,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Task, StoreError> {
        let updated = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("update task: {e}")))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        self.get(user_id, id).await
    }

    async fn recent(&self, user_id: Uuid, limit: usize) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("select tasks: {e}")))?;

        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
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
        let tags_json = serde_json::to_string(&node.tags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO knowledge_nodes (id, user_id, title, content, tags, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(node.id.to_string())
        .bind(node.user_id.to_string())
        .bind(&node.title)
        .bind(&node.content)
        .bind(tags_json)
        .bind(node.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert node: {e}")))?;

        Ok(node)
    }

    async fn get_node(&self, user_id: Uuid, id: Uuid) -> Result<KnowledgeNode, StoreError> {
        let row = sqlx::query("SELECT * FROM knowledge_nodes WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("select node: {e}")))?
            .ok_or_else(|| StoreError::NotFound(format!("knowledge node {id}")))?;
        Self::row_to_node(&row)
    }

    async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeNode>, StoreError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT * FROM knowledge_nodes
            WHERE user_id = ? AND (LOWER(title) LIKE ? OR LOWER(tags) LIKE ?)
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("search nodes: {e}")))?;

        rows.iter().map(Self::row_to_node).collect()
    }

    async fn link(
        &self,
        user_id: Uuid,
        from_node: Uuid,
        to_node: Uuid,
        relation: String,
    ) -> Result<KnowledgeEdge, StoreError> {
        // Ownership check doubles as an existence check
        self.get_node(user_id, from_node).await?;
        self.get_node(user_id, to_node).await?;

        let edge = KnowledgeEdge {
            id: Uuid::new_v4(),
            from_node,
            to_node,
            relation,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO knowledge_edges (id, user_id, from_node, to_node, relation, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(edge.id.to_string())
        .bind(user_id.to_string())
        .bind(edge.from_node.to_string())
        .bind(edge.to_node.to_string())
        .bind(&edge.relation)
        .bind(edge.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert edge: {e}")))?;

        Ok(edge)
    }

    async fn edges_of(&self, user_id: Uuid, node: Uuid) -> Result<Vec<KnowledgeEdge>, StoreError> {
        self.get_node(user_id, node).await?;

        let rows = sqlx::query(
            "SELECT * FROM knowledge_edges
             WHERE user_id = ? AND (from_node = ? OR to_node = ?)",
        )
        .bind(user_id.to_string())
        .bind(node.to_string())
        .bind(node.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("select edges: {e}")))?;

        rows.iter().map(Self::row_to_edge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::store::TaskKind;

    async fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = SqliteStore::new(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn transcript_roundtrip_preserves_tool_calls() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        let session = SessionId::new();

        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "create_task".into(),
            arguments: r#"{"title":"复习"}"#.into(),
        }];

        store
            .append_turn(
                user,
                session,
                &[
                    Message::user("帮我创建任务"),
                    assistant,
                    Message::tool_result("call_1", r#"{"success":true}"#),
                ],
            )
            .await
            .unwrap();

        let messages = store.recent_turns(user, session, 10).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert_eq!(messages[1].tool_calls[0].name, "create_task");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn recent_turns_window_and_order() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        let session = SessionId::new();

        for i in 0..12 {
            store
                .append_turn(user, session, &[Message::user(format!("m{i}"))])
                .await
                .unwrap();
        }

        let messages = store.recent_turns(user, session, 10).await.unwrap();
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[9].content, "m11");
    }

    #[tokio::test]
    async fn task_crud() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();

        let task = store
            .create(
                user,
                NewTask {
                    title: "刷题".into(),
                    description: Some("概率论第二章".into()),
                    kind: TaskKind::Practice,
                    due_date: None,
                },
            )
            .await
            .unwrap();

        let fetched = store.get(user, task.id).await.unwrap();
        assert_eq!(fetched.title, "刷题");
        assert_eq!(fetched.kind, TaskKind::Practice);

        let updated = store
            .update_status(user, task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);

        assert!(store.get(Uuid::new_v4(), task.id).await.is_err());
    }

    #[tokio::test]
    async fn update_missing_task_not_found() {
        let (store, _dir) = store().await;
        let err = store
            .update_status(Uuid::new_v4(), Uuid::new_v4(), TaskStatus::Completed)
            .await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn knowledge_graph_roundtrip() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();

        let a = store
            .create_node(user, "极限".into(), None, vec!["微积分".into()])
            .await
            .unwrap();
        let b = store
            .create_node(
                user,
                "导数".into(),
                Some("变化率".into()),
                vec!["微积分".into()],
            )
            .await
            .unwrap();

        store
            .link(user, a.id, b.id, "prerequisite_of".into())
            .await
            .unwrap();

        let hits = store.search(user, "微积分", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let edges = store.edges_of(user, a.id).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation, "prerequisite_of");
    }
}
