//! Built-in tools for Mentor.
//!
//! Each tool implements the `Tool` trait from `mentor-core` and holds the
//! store trait object it operates on. `default_registry` wires up the full
//! set the orchestrator advertises to the model.

pub mod knowledge_tools;
pub mod task_tools;

pub use knowledge_tools::{CreateKnowledgeNodeTool, LinkKnowledgeNodesTool, QueryKnowledgeTool};
pub use task_tools::{BatchCreateTasksTool, CreateTaskTool, UpdateTaskStatusTool};

use mentor_core::store::{KnowledgeStore, TaskStore};
use mentor_core::tool::ToolRegistry;
use std::sync::Arc;

/// Create the default tool registry with all built-in tools.
pub fn default_registry(
    tasks: Arc<dyn TaskStore>,
    knowledge: Arc<dyn KnowledgeStore>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CreateTaskTool::new(tasks.clone())));
    registry.register(Box::new(UpdateTaskStatusTool::new(tasks.clone())));
    registry.register(Box::new(BatchCreateTasksTool::new(tasks)));
    registry.register(Box::new(QueryKnowledgeTool::new(knowledge.clone())));
    registry.register(Box::new(CreateKnowledgeNodeTool::new(knowledge.clone())));
    registry.register(Box::new(LinkKnowledgeNodesTool::new(knowledge)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_storage::InMemoryStore;

    #[test]
    fn default_registry_has_all_tools() {
        let store = Arc::new(InMemoryStore::new());
        let registry = default_registry(store.clone(), store);
        let names = registry.names();
        for expected in [
            "batch_create_tasks",
            "create_knowledge_node",
            "create_task",
            "link_knowledge_nodes",
            "query_knowledge",
            "update_task_status",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn only_batch_create_requires_confirmation() {
        let store = Arc::new(InMemoryStore::new());
        let registry = default_registry(store.clone(), store);
        for def in registry.definitions() {
            let tool = registry.get(&def.name).unwrap();
            let gated = tool.requires_confirmation();
            assert_eq!(gated, def.name == "batch_create_tasks", "{}", def.name);
        }
    }
}
