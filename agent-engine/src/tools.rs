use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::Chunk;
use common::storage::types::knowledge::Knowledge;
use common::storage::types::knowledge_base::KnowledgeBase;
use common::utils::contracts::RetrieveEngine;
use retrieval_pipeline::{hybrid_search, HybridSearchParams};
use serde_json::{json, Value};

/// One callable action the agent loop can invoke. Parameters are described as
/// a JSON schema so the chat model can be told how to call it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError>;
}

/// Collaborators every tool needs, built once per agent run and shared across
/// iterations and tool calls.
pub struct ToolContext {
    pub db: Arc<SurrealDbClient>,
    pub retrieve_engine: Arc<dyn RetrieveEngine>,
    pub tenant_id: String,
    pub kb_id: String,
    pub knowledge_ids: Vec<String>,
}

fn arg_str<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

pub struct ThinkingTool;

#[async_trait]
impl Tool for ThinkingTool {
    fn name(&self) -> &'static str {
        "thinking"
    }
    fn description(&self) -> &'static str {
        "Record a private reasoning step; touches no external system."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"thought": {"type": "string"}}, "required": ["thought"]})
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, AppError> {
        Ok(arg_str(&args, "thought").to_string())
    }
}

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &'static str {
        "todo_write"
    }
    fn description(&self) -> &'static str {
        "Maintain a scratch checklist of remaining sub-tasks for this turn."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"items": {"type": "array", "items": {"type": "string"}}}, "required": ["items"]})
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, AppError> {
        let items = args.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(format!("{} items recorded", items.len()))
    }
}

pub struct KnowledgeSearchTool;

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &'static str {
        "knowledge_search"
    }
    fn description(&self) -> &'static str {
        "Hybrid vector+keyword search over the knowledge base's chunks."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}, "top_k": {"type": "integer"}}, "required": ["query"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError> {
        let query = arg_str(&args, "query").to_string();
        let top_k = args.get("top_k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let kb = ctx
            .db
            .get_item::<KnowledgeBase>(&ctx.kb_id)
            .await?
            .ok_or_else(|| AppError::NotFound("knowledge base not found".into()))?;
        let params = HybridSearchParams {
            kb_id: ctx.kb_id.clone(),
            kb_type: kb.kb_type,
            query_text: query,
            match_count: top_k,
            disable_vector: false,
            disable_keywords: false,
            knowledge_ids: (!ctx.knowledge_ids.is_empty()).then(|| ctx.knowledge_ids.clone()),
        };
        let matches = hybrid_search(&ctx.db, ctx.retrieve_engine.as_ref(), params).await?;
        let payload: Vec<Value> = matches
            .iter()
            .map(|m| json!({"chunk_id": m.chunk.id, "content": m.chunk.content, "match_type": m.match_type}))
            .collect();
        serde_json::to_string(&payload).map_err(|e| AppError::InternalError(e.to_string()))
    }
}

pub struct GrepChunksTool;

#[async_trait]
impl Tool for GrepChunksTool {
    fn name(&self) -> &'static str {
        "grep_chunks"
    }
    fn description(&self) -> &'static str {
        "Full-text search for a literal substring across the knowledge base's chunks."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"pattern": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["pattern"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError> {
        let pattern = arg_str(&args, "pattern").to_string();
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let hits = Chunk::fts_search(&ctx.db, &ctx.kb_id, &pattern, limit).await?;
        let payload: Vec<Value> = hits.iter().map(|h| json!({"chunk_id": h.chunk.id, "content": h.chunk.content})).collect();
        serde_json::to_string(&payload).map_err(|e| AppError::InternalError(e.to_string()))
    }
}

pub struct ListKnowledgeChunksTool;

#[async_trait]
impl Tool for ListKnowledgeChunksTool {
    fn name(&self) -> &'static str {
        "list_knowledge_chunks"
    }
    fn description(&self) -> &'static str {
        "List every chunk belonging to a single Knowledge, in chunk_index order."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"knowledge_id": {"type": "string"}}, "required": ["knowledge_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError> {
        let knowledge_id = arg_str(&args, "knowledge_id");
        let mut chunks = Chunk::list_by_knowledge_id(&ctx.db, knowledge_id).await?;
        chunks.sort_by_key(|c| c.chunk_index);
        let payload: Vec<Value> = chunks.iter().map(|c| json!({"chunk_id": c.id, "chunk_index": c.chunk_index, "content": c.content})).collect();
        serde_json::to_string(&payload).map_err(|e| AppError::InternalError(e.to_string()))
    }
}

pub struct GetDocumentInfoTool;

#[async_trait]
impl Tool for GetDocumentInfoTool {
    fn name(&self) -> &'static str {
        "get_document_info"
    }
    fn description(&self) -> &'static str {
        "Fetch the Knowledge record (title, parse status, summary status) for a source."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"knowledge_id": {"type": "string"}}, "required": ["knowledge_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError> {
        let knowledge_id = arg_str(&args, "knowledge_id");
        let knowledge = ctx
            .db
            .get_item::<Knowledge>(knowledge_id)
            .await?
            .ok_or_else(|| AppError::NotFound("knowledge not found".into()))?;
        serde_json::to_string(&knowledge).map_err(|e| AppError::InternalError(e.to_string()))
    }
}

/// `GraphRepository` is opaque per the external-collaborator contract: the
/// core never inspects entity/relationship schema, so this tool can only
/// report that no query surface is wired in this deployment.
pub struct QueryKnowledgeGraphTool;

#[async_trait]
impl Tool for QueryKnowledgeGraphTool {
    fn name(&self) -> &'static str {
        "query_knowledge_graph"
    }
    fn description(&self) -> &'static str {
        "Query extracted entities/relationships for this knowledge base."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, AppError> {
        Err(AppError::FatalExternal("no graph query backend configured".into()))
    }
}

/// Read-only, parameterised lookups scoped to the caller's own knowledge
/// base. Distinct from an arbitrary query tool: only a closed set of named
/// lookups is supported, so nothing outside tenant scope is reachable.
pub struct DatabaseQueryTool;

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn name(&self) -> &'static str {
        "database_query"
    }
    fn description(&self) -> &'static str {
        "Run a named, read-only lookup (\"count_knowledges\" or \"count_chunks\") scoped to this knowledge base."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"lookup": {"type": "string", "enum": ["count_knowledges", "count_chunks"]}}, "required": ["lookup"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AppError> {
        match arg_str(&args, "lookup") {
            "count_knowledges" => {
                let knowledges = Knowledge::list_by_kb(&ctx.db, &ctx.kb_id).await?;
                Ok(json!({"count": knowledges.len()}).to_string())
            }
            "count_chunks" => {
                let mut response = ctx
                    .db
                    .client
                    .query("SELECT count() FROM chunk WHERE kb_id = $kb_id GROUP ALL")
                    .bind(("kb_id", ctx.kb_id.clone()))
                    .await?;
                #[derive(serde::Deserialize)]
                struct Row {
                    count: usize,
                }
                let rows: Vec<Row> = response.take(0)?;
                Ok(json!({"count": rows.first().map(|r| r.count).unwrap_or(0)}).to_string())
            }
            other => Err(AppError::Validation(format!("unknown lookup \"{other}\""))),
        }
    }
}

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }
    fn description(&self) -> &'static str {
        "Search the public web for a query."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, AppError> {
        Err(AppError::FatalExternal("no web search provider configured".into()))
    }
}

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &'static str {
        "web_fetch"
    }
    fn description(&self) -> &'static str {
        "Fetch and extract readable content from a URL."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, AppError> {
        Err(AppError::FatalExternal("no web fetch provider configured".into()))
    }
}

/// Builds the tool set for one agent run, applying the default-set filtering
/// rules: KB-touching tools are dropped when there's nothing to search, and
/// web tools are added only when the session enables web search.
pub fn build_registry(has_kb_scope: bool, web_search_enabled: bool) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = vec![Box::new(ThinkingTool)];

    if has_kb_scope {
        tools.push(Box::new(TodoWriteTool));
        tools.push(Box::new(KnowledgeSearchTool));
        tools.push(Box::new(GrepChunksTool));
        tools.push(Box::new(ListKnowledgeChunksTool));
        tools.push(Box::new(QueryKnowledgeGraphTool));
        tools.push(Box::new(GetDocumentInfoTool));
        tools.push(Box::new(DatabaseQueryTool));
    } else if web_search_enabled {
        tools.push(Box::new(TodoWriteTool));
    }

    if web_search_enabled {
        tools.push(Box::new(WebSearchTool));
        tools.push(Box::new(WebFetchTool));
    }

    tools
}
