use std::collections::HashMap;
use std::time::Duration;

use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::Chunk;
use common::storage::types::knowledge::Knowledge;
use common::storage::types::task_progress::{TaskProgress, TaskProgressStatus, KB_CLONE_PROGRESS_TTL_SECS};
use common::storage::types::StoredObject;
use tracing::warn;

use crate::context::OrchestratorContext;
use crate::progress;

/// Handles the `KbClone` task: deep-copies every knowledge and chunk from a
/// source KB into an already-created, empty destination KB, remapping
/// cross-chunk references (`parent_chunk_id`, `pre_chunk_id`, `next_chunk_id`,
/// `relation_chunks`) to the freshly minted IDs, then asks the retrieval
/// engine to copy the matching index entries. Unlike FAQ import, a KB clone
/// has no single-task-per-KB lock — two clones into distinct destination KBs
/// never contend.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;

    let src_kb_id = task
        .payload
        .get("src_kb_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("kb_clone payload missing src_kb_id".into()))?
        .to_string();
    let dst_kb_id = task
        .payload
        .get("dst_kb_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("kb_clone payload missing dst_kb_id".into()))?
        .to_string();

    if let Some(existing) = progress::load(ctx.kv.as_ref(), &task.id).await? {
        if existing.status == TaskProgressStatus::Completed {
            return Ok(());
        }
    }

    match run_clone(ctx, &task.id, &src_kb_id, &dst_kb_id).await {
        Ok(()) => Ok(()),
        Err(err) => on_failure(ctx, &task.id, &src_kb_id, retry_count, max_retry, err).await,
    }
}

async fn run_clone(ctx: &OrchestratorContext, task_id: &str, src_kb_id: &str, dst_kb_id: &str) -> Result<(), AppError> {
    let ttl = Duration::from_secs(KB_CLONE_PROGRESS_TTL_SECS);
    let source_knowledges = Knowledge::list_by_kb(&ctx.db, src_kb_id).await?;

    let mut progress = progress::load(ctx.kv.as_ref(), task_id)
        .await?
        .unwrap_or_else(|| TaskProgress::new(task_id.to_string(), dst_kb_id.to_string(), source_knowledges.len() as u64));
    progress.total = source_knowledges.len() as u64;

    let mut knowledge_map: HashMap<String, String> = HashMap::new();
    let mut chunk_map: HashMap<String, String> = HashMap::new();
    let mut cloned_chunks: Vec<Chunk> = Vec::new();

    for (i, source_knowledge) in source_knowledges.iter().enumerate() {
        let mut cloned_knowledge = source_knowledge.clone();
        let new_knowledge_id = uuid::Uuid::new_v4().to_string();
        knowledge_map.insert(source_knowledge.id.clone(), new_knowledge_id.clone());
        cloned_knowledge.id = new_knowledge_id.clone();
        cloned_knowledge.kb_id = dst_kb_id.to_string();
        ctx.db.store_item(cloned_knowledge).await?;

        let source_chunks = Chunk::list_by_knowledge_id(&ctx.db, &source_knowledge.id).await?;
        for source_chunk in source_chunks {
            let mut cloned_chunk = source_chunk.clone();
            let new_chunk_id = uuid::Uuid::new_v4().to_string();
            chunk_map.insert(source_chunk.id.clone(), new_chunk_id.clone());
            cloned_chunk.id = new_chunk_id;
            cloned_chunk.knowledge_id = new_knowledge_id.clone();
            cloned_chunk.kb_id = dst_kb_id.to_string();
            cloned_chunks.push(cloned_chunk);
        }

        progress.advance((i + 1) as u64, Some(format!("cloned knowledge {}/{}", i + 1, source_knowledges.len())));
        progress::save(ctx.kv.as_ref(), &progress, ttl).await?;
    }

    for chunk in &mut cloned_chunks {
        chunk.parent_chunk_id = chunk.parent_chunk_id.as_ref().and_then(|id| chunk_map.get(id)).cloned();
        chunk.pre_chunk_id = chunk.pre_chunk_id.as_ref().and_then(|id| chunk_map.get(id)).cloned();
        chunk.next_chunk_id = chunk.next_chunk_id.as_ref().and_then(|id| chunk_map.get(id)).cloned();
        chunk.relation_chunks = chunk.relation_chunks.iter().filter_map(|id| chunk_map.get(id).cloned()).collect();
    }
    for chunk in cloned_chunks {
        ctx.db.store_item(chunk).await?;
    }

    ctx.retrieve_engine.copy_indices(src_kb_id, dst_kb_id, &knowledge_map, &chunk_map).await?;

    progress.complete();
    progress::save(ctx.kv.as_ref(), &progress, ttl).await?;
    Ok(())
}

async fn on_failure(ctx: &OrchestratorContext, task_id: &str, dst_kb_id: &str, retry_count: u32, max_retry: u32, err: AppError) -> Result<(), AppError> {
    match &err {
        AppError::QuotaExceeded(message) | AppError::FatalExternal(message) => {
            fail_clone(ctx, task_id, message.clone()).await?;
            Ok(())
        }
        _ if err.is_retryable() => {
            if retry_count.saturating_add(1) >= max_retry {
                fail_clone(ctx, task_id, err.to_string()).await?;
            }
            Err(err)
        }
        _ => {
            warn!(dst_kb_id, error = %err, "non-retryable kb_clone failure");
            fail_clone(ctx, task_id, err.to_string()).await?;
            Ok(())
        }
    }
}

async fn fail_clone(ctx: &OrchestratorContext, task_id: &str, message: String) -> Result<(), AppError> {
    if let Some(mut progress) = progress::load(ctx.kv.as_ref(), task_id).await? {
        progress.fail(message);
        progress::save(ctx.kv.as_ref(), &progress, Duration::from_secs(KB_CLONE_PROGRESS_TTL_SECS)).await?;
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
    use common::storage::types::chunk::ChunkType;
    use common::storage::types::knowledge::KnowledgeType;
    use common::storage::types::message::Message;
    use common::utils::contracts::{
        ChatCompletionChunk, ChatModel, Embedder, FileService, GraphNamespace, GraphRepository, IndexBatchEntry, ReaderChunk, RetrieveEngine,
        RetrieveParams, RetrievedHit,
    };
    use futures::stream::BoxStream;
    use std::sync::{Arc, Mutex};

    struct NoopChatModel;
    #[async_trait]
    impl ChatModel for NoopChatModel {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String, AppError> {
            Ok(String::new())
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

    struct NoopGraph;
    #[async_trait]
    impl GraphRepository for NoopGraph {
        async fn add_graph(&self, _namespace: GraphNamespace, _graph_data: Vec<serde_json::Value>) -> Result<(), AppError> {
            Ok(())
        }
        async fn del_graph(&self, _namespaces: Vec<GraphNamespace>) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        copies: Mutex<Vec<(String, String, usize, usize)>>,
    }
    #[async_trait]
    impl RetrieveEngine for RecordingEngine {
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
            src_kb: &str,
            dst_kb: &str,
            knowledge_map: &HashMap<String, String>,
            chunk_map: &HashMap<String, String>,
        ) -> Result<(), AppError> {
            self.copies
                .lock()
                .unwrap()
                .push((src_kb.to_string(), dst_kb.to_string(), knowledge_map.len(), chunk_map.len()));
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
            kind: common::storage::types::task::TaskKind::KbClone,
            payload,
            queue: "default".into(),
            max_retry: 3,
            retry_count: 0,
        }
    }

    async fn setup() -> (OrchestratorContext, String, String, Arc<RecordingEngine>) {
        let db = Arc::new(SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string()).await.unwrap());
        db.apply_migrations().await.unwrap();

        let src_kb_id = "kb-src".to_string();
        let dst_kb_id = "kb-dst".to_string();

        let knowledge = Knowledge::new("t1".into(), src_kb_id.clone(), KnowledgeType::Document, "doc".into(), None, None, 0);
        db.store_item(knowledge.clone()).await.unwrap();

        let parent = Chunk::new("t1".into(), knowledge.id.clone(), src_kb_id.clone(), 0, "first".into(), ChunkType::Text);
        let mut child = Chunk::new("t1".into(), knowledge.id.clone(), src_kb_id.clone(), 1, "second".into(), ChunkType::Text);
        child.parent_chunk_id = Some(parent.id.clone());
        child.pre_chunk_id = Some(parent.id.clone());
        let mut parent = parent;
        parent.next_chunk_id = Some(child.id.clone());
        parent.relation_chunks = vec![child.id.clone()];
        db.store_item(parent.clone()).await.unwrap();
        db.store_item(child.clone()).await.unwrap();

        let engine = Arc::new(RecordingEngine::default());
        let ctx = OrchestratorContext {
            db: db.clone(),
            queue: Arc::new(InMemoryQueue::new()),
            kv: Arc::new(InMemoryKvCache::new()),
            retrieve_engine: engine.clone(),
            embedder: Arc::new(NoopEmbedder),
            chat_model: Arc::new(NoopChatModel),
            doc_reader: Arc::new(NoopDocReader),
            file_service: Arc::new(NoopFileService),
            graph_repository: Arc::new(NoopGraph),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 8,
        };

        (ctx, src_kb_id, dst_kb_id, engine)
    }

    #[tokio::test]
    async fn clones_knowledges_and_remaps_chunk_references() {
        let (ctx, src_kb_id, dst_kb_id, engine) = setup().await;
        let task = task_for(serde_json::json!({ "src_kb_id": src_kb_id, "dst_kb_id": dst_kb_id }));
        handle(&ctx, &task).await.unwrap();

        let cloned_knowledges = Knowledge::list_by_kb(&ctx.db, &dst_kb_id).await.unwrap();
        assert_eq!(cloned_knowledges.len(), 1);
        let cloned_chunks = Chunk::list_by_knowledge_id(&ctx.db, &cloned_knowledges[0].id).await.unwrap();
        assert_eq!(cloned_chunks.len(), 2);

        let cloned_child = cloned_chunks.iter().find(|c| c.chunk_index == 1).unwrap();
        let cloned_parent = cloned_chunks.iter().find(|c| c.chunk_index == 0).unwrap();
        assert_eq!(cloned_child.parent_chunk_id.as_deref(), Some(cloned_parent.id.as_str()));
        assert_eq!(cloned_parent.next_chunk_id.as_deref(), Some(cloned_child.id.as_str()));
        assert_eq!(cloned_parent.relation_chunks, vec![cloned_child.id.clone()]);

        let copies = engine.copies.lock().unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].2, 1);
        assert_eq!(copies[0].3, 2);
    }

    #[tokio::test]
    async fn already_completed_clone_is_a_noop() {
        let (ctx, src_kb_id, dst_kb_id, engine) = setup().await;
        let task = task_for(serde_json::json!({ "src_kb_id": src_kb_id, "dst_kb_id": dst_kb_id }));
        handle(&ctx, &task).await.unwrap();
        handle(&ctx, &task).await.unwrap();

        assert_eq!(engine.copies.lock().unwrap().len(), 1);
    }
}
