pub mod chat;
pub mod init;
pub mod serve;
pub mod status;
pub mod tools_cmd;

use std::sync::Arc;
use uuid::Uuid;

use mentor_config::AppConfig;
use mentor_core::store::{KnowledgeStore, TaskStore, TranscriptStore};
use mentor_orchestrator::ChatOrchestrator;
use mentor_storage::{InMemoryStore, SqliteStore};

/// Build the orchestrator the same way the gateway does, backed by the
/// configured store.
pub(crate) async fn build_orchestrator(
    config: &AppConfig,
) -> Result<ChatOrchestrator, Box<dyn std::error::Error>> {
    let provider = mentor_providers::build_provider(&config.provider)?;

    let (transcripts, tasks, knowledge): (
        Arc<dyn TranscriptStore>,
        Arc<dyn TaskStore>,
        Arc<dyn KnowledgeStore>,
    ) = if config.storage.backend == "memory" {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), store.clone(), store)
    } else {
        let path = config.database_path();
        let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
        (store.clone(), store.clone(), store)
    };

    let registry = Arc::new(mentor_tools::default_registry(tasks, knowledge));
    Ok(ChatOrchestrator::new(
        provider,
        registry,
        transcripts,
        config,
    ))
}

/// Stable per-machine user id for the local CLI, persisted next to the
/// config file so transcripts and tasks survive restarts.
pub(crate) fn cli_user_id() -> Uuid {
    let path = AppConfig::config_dir().join("user_id");
    if let Ok(raw) = std::fs::read_to_string(&path) {
        if let Ok(id) = Uuid::parse_str(raw.trim()) {
            return id;
        }
    }
    let id = Uuid::new_v4();
    if std::fs::create_dir_all(AppConfig::config_dir()).is_ok() {
        let _ = std::fs::write(&path, id.to_string());
    }
    id
}
