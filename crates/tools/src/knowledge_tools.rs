//! Knowledge-base tools: search nodes, create nodes, link nodes.

use async_trait::async_trait;
use mentor_core::error::ToolError;
use mentor_core::store::{KnowledgeNode, KnowledgeStore};
use mentor_core::tool::{Tool, ToolCategory, ToolContext, ToolOutput};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 20;

fn node_summary(node: &KnowledgeNode) -> serde_json::Value {
    json!({
        "node_id": node.id,
        "title": node.title,
        "tags": node.tags,
    })
}

#[derive(Deserialize)]
struct QueryKnowledgeArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct QueryKnowledgeTool {
    store: Arc<dyn KnowledgeStore>,
}

impl QueryKnowledgeTool {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for QueryKnowledgeTool {
    fn name(&self) -> &str {
        "query_knowledge"
    }

    fn description(&self) -> &str {
        "Search the user's knowledge base by title or tag. Use before answering questions about what the user has already studied."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Knowledge
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search text, matched against titles and tags" },
                "limit": { "type": "number", "description": "Max results, defaults to 5" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: QueryKnowledgeArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        let limit = args
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);

        let nodes = self
            .store
            .search(ctx.user_id, args.query.trim(), limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "query_knowledge".into(),
                reason: e.to_string(),
            })?;

        let summaries: Vec<serde_json::Value> = nodes.iter().map(node_summary).collect();
        Ok(
            ToolOutput::with_data(json!({ "count": nodes.len(), "nodes": nodes }))
                .widget("knowledge_list", json!({ "nodes": summaries })),
        )
    }
}

#[derive(Deserialize)]
struct CreateKnowledgeNodeArgs {
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct CreateKnowledgeNodeTool {
    store: Arc<dyn KnowledgeStore>,
}

impl CreateKnowledgeNodeTool {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreateKnowledgeNodeTool {
    fn name(&self) -> &str {
        "create_knowledge_node"
    }

    fn description(&self) -> &str {
        "Record a new concept or note in the user's knowledge base."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Knowledge
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Concept name" },
                "content": { "type": "string", "description": "Optional notes" },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Subject tags, e.g. 微积分"
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: CreateKnowledgeNodeArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.title.trim().is_empty() {
            return Err(ToolError::InvalidArguments("title must not be empty".into()));
        }

        let node = self
            .store
            .create_node(ctx.user_id, args.title, args.content, args.tags)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "create_knowledge_node".into(),
                reason: e.to_string(),
            })?;

        Ok(ToolOutput::with_data(json!({ "node": node })))
    }
}

#[derive(Deserialize)]
struct LinkKnowledgeNodesArgs {
    from_node: String,
    to_node: String,
    relation: String,
}

pub struct LinkKnowledgeNodesTool {
    store: Arc<dyn KnowledgeStore>,
}

impl LinkKnowledgeNodesTool {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LinkKnowledgeNodesTool {
    fn name(&self) -> &str {
        "link_knowledge_nodes"
    }

    fn description(&self) -> &str {
        "Connect two knowledge nodes with a relation such as prerequisite_of or related_to."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Knowledge
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "from_node": { "type": "string", "description": "UUID of the source node" },
                "to_node": { "type": "string", "description": "UUID of the target node" },
                "relation": {
                    "type": "string",
                    "description": "Relation name, e.g. prerequisite_of, related_to"
                }
            },
            "required": ["from_node", "to_node", "relation"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: LinkKnowledgeNodesArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let from = uuid::Uuid::parse_str(&args.from_node)
            .map_err(|e| ToolError::InvalidArguments(format!("from_node: {e}")))?;
        let to = uuid::Uuid::parse_str(&args.to_node)
            .map_err(|e| ToolError::InvalidArguments(format!("to_node: {e}")))?;
        if from == to {
            return Err(ToolError::InvalidArguments(
                "cannot link a node to itself".into(),
            ));
        }
        if args.relation.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "relation must not be empty".into(),
            ));
        }

        let edge = self
            .store
            .link(ctx.user_id, from, to, args.relation)
            .await
            .map_err(|e| match e {
                mentor_core::StoreError::NotFound(what) => ToolError::NotFound(what),
                other => ToolError::ExecutionFailed {
                    tool_name: "link_knowledge_nodes".into(),
                    reason: other.to_string(),
                },
            })?;

        Ok(ToolOutput::with_data(json!({ "edge": edge })))
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
    async fn create_then_query() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ctx();

        let create = CreateKnowledgeNodeTool::new(store.clone());
        create
            .execute(
                json!({"title": "泰勒展开", "tags": ["微积分"]}),
                &ctx,
            )
            .await
            .unwrap();

        let query = QueryKnowledgeTool::new(store);
        let out = query
            .execute(json!({"query": "泰勒"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data.unwrap()["count"], 1);
        assert_eq!(out.widget_type.as_deref(), Some("knowledge_list"));
    }

    #[tokio::test]
    async fn query_rejects_blank_query() {
        let store = Arc::new(InMemoryStore::new());
        let tool = QueryKnowledgeTool::new(store);
        let err = tool.execute(json!({"query": "  "}), &ctx()).await;
        assert!(matches!(err, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn link_two_nodes() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ctx();

        let create = CreateKnowledgeNodeTool::new(store.clone());
        let a = create
            .execute(json!({"title": "极限"}), &ctx)
            .await
            .unwrap();
        let b = create
            .execute(json!({"title": "导数"}), &ctx)
            .await
            .unwrap();
        let a_id = a.data.unwrap()["node"]["id"].as_str().unwrap().to_string();
        let b_id = b.data.unwrap()["node"]["id"].as_str().unwrap().to_string();

        let link = LinkKnowledgeNodesTool::new(store);
        let out = link
            .execute(
                json!({"from_node": a_id, "to_node": b_id, "relation": "prerequisite_of"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.data.unwrap()["edge"]["relation"], "prerequisite_of");
    }

    #[tokio::test]
    async fn link_rejects_self_reference() {
        let store = Arc::new(InMemoryStore::new());
        let id = Uuid::new_v4().to_string();
        let tool = LinkKnowledgeNodesTool::new(store);
        let err = tool
            .execute(
                json!({"from_node": id.clone(), "to_node": id, "relation": "related_to"}),
                &ctx(),
            )
            .await;
        assert!(matches!(err, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn link_missing_node_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ctx();
        let create = CreateKnowledgeNodeTool::new(store.clone());
        let a = create
            .execute(json!({"title": "集合论"}), &ctx)
            .await
            .unwrap();
        let a_id = a.data.unwrap()["node"]["id"].as_str().unwrap().to_string();

        let tool = LinkKnowledgeNodesTool::new(store);
        let err = tool
            .execute(
                json!({
                    "from_node": a_id,
                    "to_node": Uuid::new_v4().to_string(),
                    "relation": "related_to"
                }),
                &ctx,
            )
            .await;
        assert!(matches!(err, Err(ToolError::NotFound(_))));
    }
}
