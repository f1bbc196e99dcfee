use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::{Chunk, ChunkType};
use common::storage::types::knowledge::Knowledge;
use common::storage::types::message::{Message, MessageRole};
use common::utils::contracts::GraphNamespace;
use tracing::warn;

use crate::context::OrchestratorContext;

const EXTRACT_PROMPT: &str = "Extract entities and relationships from the following passage as a JSON array \
    of {\"subject\":...,\"predicate\":...,\"object\":...} objects. Reply with the JSON array only:\n\n";

/// A KB only ever has one graph namespace; `k` distinguishes concurrently
/// live graph generations on backends that version them. Core never rebuilds
/// more than one generation at a time, so every namespace core constructs
/// uses the same fixed value.
pub const GRAPH_GENERATION: u32 = 0;

/// Handles the `GraphRebuild` task. Idempotent by construction: the old graph
/// namespace is dropped before the new one is built, so a retry after a
/// partial rebuild never leaves stale and fresh data mixed together.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;
    let kb_id = task
        .payload
        .get("kb_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("graph_rebuild payload missing kb_id".into()))?;

    match rebuild(ctx, kb_id).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_retryable() && retry_count.saturating_add(1) < max_retry => Err(err),
        Err(err) => {
            warn!(kb_id, error = %err, "graph_rebuild gave up after exhausting retries");
            Ok(())
        }
    }
}

async fn rebuild(ctx: &OrchestratorContext, kb_id: &str) -> Result<(), AppError> {
    ctx.graph_repository
        .del_graph(vec![GraphNamespace {
            kb_id: kb_id.to_string(),
            k: GRAPH_GENERATION,
        }])
        .await?;

    let knowledges = Knowledge::list_by_kb(&ctx.db, kb_id).await?;
    let mut graph_data = Vec::new();
    for knowledge in &knowledges {
        let chunks = Chunk::list_by_knowledge_id(&ctx.db, &knowledge.id).await?;
        for chunk in chunks.into_iter().filter(|c| c.chunk_type == ChunkType::Text) {
            let prompt = format!("{EXTRACT_PROMPT}{}", chunk.content);
            let raw = ctx
                .chat_model
                .complete(&ctx.embedding_model, &[Message::new(chunk.id.clone(), MessageRole::User, prompt, None)])
                .await?;
            match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
                Ok(mut triples) => graph_data.append(&mut triples),
                Err(err) => warn!(chunk_id = %chunk.id, error = %err, "graph extraction returned invalid JSON, skipping chunk"),
            }
        }
    }

    if !graph_data.is_empty() {
        ctx.graph_repository
            .add_graph(
                GraphNamespace {
                    kb_id: kb_id.to_string(),
                    k: GRAPH_GENERATION,
                },
                graph_data,
            )
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::db::SurrealDbClient;
    use common::storage::kv::InMemoryKvCache;
    use common::storage::queue::InMemoryQueue;
    use common::storage::types::knowledge::KnowledgeType;
    use common::storage::types::knowledge_base::{KnowledgeBase, KnowledgeBaseType};
    use common::storage::types::tenant::Tenant;
    use common::utils::contracts::{
        ChatCompletionChunk, ChatModel, Embedder, FileService, GraphRepository, ReaderChunk, RetrieveEngine, RetrieveParams, RetrievedHit,
    };
    use common::utils::contracts::IndexBatchEntry;
    use futures::stream::BoxStream;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FixedChatModel(String);
    #[async_trait]
    impl ChatModel for FixedChatModel {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String, AppError> {
            Ok(self.0.clone())
        }
        async fn stream(&self, _model: &str, _messages: &[Message]) -> Result<BoxStream<'static, Result<ChatCompletionChunk, AppError>>, AppError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    struct NoopEmbedder;
    #[async_trait]
    impl Embedder for NoopEmbedder {
        async fn embed(&self, _input: &str, _model: &str, _dimensions: u32) -> Result<Vec<f32>, AppError> {
            Ok(vec![0.1])
        }
    }

    struct NoopDocReader;
    #[async_trait]
    impl common::utils::contracts::DocReader for NoopDocReader {
        async fn read_from_file(&self, _mime_type: &str, _bytes: &[u8]) -> Result<Vec<ReaderChunk>, AppError> {
            Ok(vec![])
        }
        async fn read_from_url(&self, _url: &str) -> Result<Vec<ReaderChunk>, AppError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct NoopFileService;
    #[async_trait]
    impl FileService for NoopFileService {
        async fn put(&self, _location: &str, _bytes: Vec<u8>) -> Result<(), AppError> {
            Ok(())
        }
        async fn get(&self, _location: &str) -> Result<Vec<u8>, AppError> {
            Ok(vec![])
        }
        async fn delete(&self, _location: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGraph {
        added: Mutex<Vec<(GraphNamespace, usize)>>,
        dropped: Mutex<Vec<GraphNamespace>>,
    }
    #[async_trait]
    impl GraphRepository for RecordingGraph {
        async fn add_graph(&self, namespace: GraphNamespace, graph_data: Vec<serde_json::Value>) -> Result<(), AppError> {
            self.added.lock().unwrap().push((namespace, graph_data.len()));
            Ok(())
        }
        async fn del_graph(&self, namespaces: Vec<GraphNamespace>) -> Result<(), AppError> {
            self.dropped.lock().unwrap().extend(namespaces);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoopEngine;
    #[async_trait]
    impl RetrieveEngine for NoopEngine {
        async fn retrieve(&self, _params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
            Ok(vec![])
        }
        async fn batch_index(&self, _entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_knowledge_id_list(&self, _knowledge_ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_chunk_id_list(&self, _chunk_ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_source_id_list(&self, _source_ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        fn estimate_storage_size(&self, _entries: &[IndexBatchEntry]) -> u64 {
            0
        }
        async fn copy_indices(
            &self,
            _src_kb: &str,
            _dst_kb: &str,
            _knowledge_map: &HashMap<String, String>,
            _chunk_map: &HashMap<String, String>,
        ) -> Result<(), AppError> {
            Ok(())
        }
        async fn batch_update_chunk_enabled_status(&self, _updates: &HashMap<String, bool>) -> Result<(), AppError> {
            Ok(())
        }
        fn supports_retriever(&self, _kind: &str) -> bool {
            true
        }
    }

    fn task_for(payload: serde_json::Value) -> QueuedTask {
        QueuedTask {
            id: "task1".into(),
            kind: common::storage::types::task::TaskKind::GraphRebuild,
            payload,
            queue: "default".into(),
            max_retry: 3,
            retry_count: 0,
        }
    }

    async fn setup(chat_reply: &str) -> (OrchestratorContext, String, Arc<RecordingGraph>) {
        let db = Arc::new(SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string()).await.unwrap());
        db.apply_migrations().await.unwrap();

        let tenant = Tenant::new("acme".into(), 1_000_000, vec![], "text-embedding-3-small".into(), "gpt-4o-mini".into());
        db.store_item(tenant.clone()).await.unwrap();

        let kb = KnowledgeBase::new(tenant.id.clone(), "kb1".into(), KnowledgeBaseType::Document);
        db.store_item(kb.clone()).await.unwrap();

        let knowledge = Knowledge::new(tenant.id.clone(), kb.id.clone(), KnowledgeType::Document, "doc".into(), None, None, 0);
        db.store_item(knowledge.clone()).await.unwrap();

        let chunk = Chunk::new(tenant.id.clone(), knowledge.id.clone(), kb.id.clone(), 0, "alice manages bob".into(), ChunkType::Text);
        db.store_item(chunk).await.unwrap();

        let graph = Arc::new(RecordingGraph::default());
        let ctx = OrchestratorContext {
            db: db.clone(),
            queue: Arc::new(InMemoryQueue::new()),
            kv: Arc::new(InMemoryKvCache::new()),
            retrieve_engine: Arc::new(NoopEngine::default()),
            embedder: Arc::new(NoopEmbedder),
            chat_model: Arc::new(FixedChatModel(chat_reply.to_string())),
            doc_reader: Arc::new(NoopDocReader),
            file_service: Arc::new(NoopFileService),
            graph_repository: graph.clone(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 8,
        };

        (ctx, kb.id, graph)
    }

    #[tokio::test]
    async fn rebuild_drops_the_old_namespace_and_adds_the_new_one() {
        let (ctx, kb_id, graph) = setup(r#"[{"subject":"alice","predicate":"manages","object":"bob"}]"#).await;
        let task = task_for(serde_json::json!({ "kb_id": kb_id }));
        handle(&ctx, &task).await.unwrap();

        assert_eq!(graph.dropped.lock().unwrap().len(), 1);
        assert_eq!(graph.added.lock().unwrap().len(), 1);
        assert_eq!(graph.added.lock().unwrap()[0].1, 1);
    }

    #[tokio::test]
    async fn invalid_extraction_json_is_skipped_not_fatal() {
        let (ctx, kb_id, _graph) = setup("not json").await;
        let task = task_for(serde_json::json!({ "kb_id": kb_id }));
        handle(&ctx, &task).await.unwrap();
    }
}
