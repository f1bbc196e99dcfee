use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::{Chunk, ChunkType};
use common::storage::types::knowledge::{Knowledge, ParseStatus, SummaryStatus};
use common::storage::types::tenant::Tenant;
use common::storage::types::StoredObject;
use common::utils::contracts::{Embedder, IndexBatchEntry, RetrieveEngine};
use tracing::{info, warn};

use crate::reader::ReaderChunk;

const GRAPH_SOURCE_TYPE: &str = "chunk";

/// What follow-up work, if any, a successful `process_chunks` run warrants.
/// The orchestrator handler owns the queue, so it decides whether and how to
/// act on this; `process_chunks` only reports what it produced.
#[derive(Debug, Default, Clone)]
pub struct ProcessChunksOutcome {
    pub has_text_chunks: bool,
    pub text_chunk_ids: Vec<String>,
}

/// Re-reads the Knowledge and reports whether it has been tombstoned for
/// deletion. Called at every gate in `process_chunks`.
async fn is_deletion_in_progress(db: &SurrealDbClient, knowledge_id: &str) -> Result<bool, AppError> {
    let knowledge: Option<Knowledge> = db.get_item(knowledge_id).await?;
    Ok(match knowledge {
        Some(k) => k.parse_status == ParseStatus::Deleting,
        None => true,
    })
}

async fn cleanup_chunks_and_index(
    db: &SurrealDbClient,
    retrieve_engine: &dyn RetrieveEngine,
    knowledge_id: &str,
) -> Result<(), AppError> {
    Chunk::delete_by_knowledge_id(db, knowledge_id).await?;
    match retrieve_engine
        .delete_by_knowledge_id_list(&[knowledge_id.to_string()])
        .await
    {
        Ok(()) | Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }
    Ok(())
}

/// The full ingestion chunk-synthesis/index/commit path run by the
/// `DocumentProcess` task consumer. Steps are numbered to match the
/// orchestrator's documented ordering and deletion-race gates.
pub async fn process_chunks(
    db: &SurrealDbClient,
    retrieve_engine: &dyn RetrieveEngine,
    embedder: &dyn Embedder,
    embedding_model: &str,
    embedding_dimensions: u32,
    knowledge_id: &str,
    reader_chunks: Vec<ReaderChunk>,
) -> Result<ProcessChunksOutcome, AppError> {
    // 1. Deletion-race gate.
    if is_deletion_in_progress(db, knowledge_id).await? {
        info!(%knowledge_id, "knowledge tombstoned before processing started, aborting silently");
        return Ok(ProcessChunksOutcome::default());
    }

    let knowledge: Knowledge = db
        .get_item(knowledge_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("knowledge {knowledge_id} not found")))?;

    // 2. Idempotent reset. Swallow not-found from the retrieve engine.
    cleanup_chunks_and_index(db, retrieve_engine, knowledge_id).await?;

    // 3. Chunk synthesis.
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut max_seq = 0u32;
    for reader_chunk in &reader_chunks {
        max_seq = max_seq.max(reader_chunk.seq);
    }

    for reader_chunk in reader_chunks {
        let trimmed = reader_chunk.content.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut text_chunk = Chunk::new(
            knowledge.tenant_id.clone(),
            knowledge.id.clone(),
            knowledge.kb_id.clone(),
            reader_chunk.seq,
            trimmed.to_string(),
            ChunkType::Text,
        );

        if !reader_chunk.images.is_empty() {
            text_chunk.image_info = Some(serde_json::to_value(&reader_chunk.images).unwrap_or_default());
        }

        let text_chunk_id = text_chunk.id.clone();
        chunks.push(text_chunk);

        for (i, image) in reader_chunk.images.iter().enumerate() {
            let offset = i as u32 * 100;
            if let Some(ocr_text) = image.ocr_text.as_ref().filter(|s| !s.is_empty()) {
                let mut ocr_chunk = Chunk::new(
                    knowledge.tenant_id.clone(),
                    knowledge.id.clone(),
                    knowledge.kb_id.clone(),
                    max_seq + offset + 1,
                    ocr_text.clone(),
                    ChunkType::ImageOcr,
                );
                ocr_chunk.parent_chunk_id = Some(text_chunk_id.clone());
                ocr_chunk.image_info = Some(serde_json::to_value(image).unwrap_or_default());
                chunks.push(ocr_chunk);
            }
            if let Some(caption) = image.caption.as_ref().filter(|s| !s.is_empty()) {
                let mut caption_chunk = Chunk::new(
                    knowledge.tenant_id.clone(),
                    knowledge.id.clone(),
                    knowledge.kb_id.clone(),
                    max_seq + offset + 2,
                    caption.clone(),
                    ChunkType::ImageCaption,
                );
                caption_chunk.parent_chunk_id = Some(text_chunk_id.clone());
                caption_chunk.image_info = Some(serde_json::to_value(image).unwrap_or_default());
                chunks.push(caption_chunk);
            }
        }
    }

    // 4. Linking: only text chunks get pre/next, in chunk_index order.
    chunks.sort_by_key(|c| c.chunk_index);
    let text_positions: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.chunk_type == ChunkType::Text)
        .map(|(idx, _)| idx)
        .collect();
    for window in text_positions.windows(2) {
        let (prev_idx, next_idx) = (window[0], window[1]);
        let next_id = chunks[next_idx].id.clone();
        let prev_id = chunks[prev_idx].id.clone();
        chunks[prev_idx].next_chunk_id = Some(next_id);
        chunks[next_idx].pre_chunk_id = Some(prev_id);
    }

    // 5. Deletion-race gate, before DB write.
    if is_deletion_in_progress(db, knowledge_id).await? {
        info!(%knowledge_id, "knowledge tombstoned before persist, aborting silently");
        return Ok(ProcessChunksOutcome::default());
    }

    // 6. Persist.
    let mut embeddings = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let embedding = embedder
            .embed(&chunk.content, embedding_model, embedding_dimensions)
            .await?;
        chunk.store_with_embedding(db, embedding.clone()).await?;
        embeddings.push(embedding);
    }

    // 7. Deletion-race gate, after persist.
    if is_deletion_in_progress(db, knowledge_id).await? {
        warn!(%knowledge_id, "knowledge tombstoned after persist, rolling back chunks");
        cleanup_chunks_and_index(db, retrieve_engine, knowledge_id).await?;
        return Ok(ProcessChunksOutcome::default());
    }

    // 8. Index. All chunk types are batch-indexed here; restricting which
    // chunk types actually surface in retrieval output is expansion.rs's job.
    let entries: Vec<IndexBatchEntry> = chunks
        .iter()
        .zip(embeddings.iter())
        .map(|(c, embedding)| IndexBatchEntry {
            source_id: c.id.clone(),
            chunk_id: c.id.clone(),
            knowledge_id: c.knowledge_id.clone(),
            kb_id: c.kb_id.clone(),
            content: c.content.clone(),
            embedding: embedding.clone(),
        })
        .collect();

    let estimate = retrieve_engine.estimate_storage_size(&entries);

    let tenant: Tenant = db
        .get_item(&knowledge.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("tenant {} not found", knowledge.tenant_id)))?;
    if tenant.would_exceed_quota(estimate) {
        cleanup_chunks_and_index(db, retrieve_engine, knowledge_id).await?;
        fail_knowledge(db, knowledge_id, "storage quota exceeded".into()).await?;
        return Err(AppError::QuotaExceeded(format!(
            "indexing {knowledge_id} would exceed tenant storage quota"
        )));
    }

    if let Err(err) = retrieve_engine.batch_index(entries).await {
        cleanup_chunks_and_index(db, retrieve_engine, knowledge_id).await?;
        fail_knowledge(db, knowledge_id, err.to_string()).await?;
        return Err(err);
    }

    // 9. Deletion-race gate, final.
    if is_deletion_in_progress(db, knowledge_id).await? {
        warn!(%knowledge_id, "knowledge tombstoned after indexing, rolling back");
        cleanup_chunks_and_index(db, retrieve_engine, knowledge_id).await?;
        return Ok(ProcessChunksOutcome::default());
    }

    // 10. Commit.
    let has_text_chunks = chunks.iter().any(|c| c.chunk_type == ChunkType::Text);
    commit_knowledge(db, knowledge_id, estimate, has_text_chunks).await?;
    Tenant::adjust_storage_used(db, &knowledge.tenant_id, estimate as i64).await?;

    // 11. Follow-up tasks: the caller owns the queue, so we only report what
    // was produced. Text chunk ids let the caller enqueue one ChunkExtract
    // task per chunk when graph extraction is enabled for the KB.
    let text_chunk_ids: Vec<String> = chunks
        .iter()
        .filter(|c| c.chunk_type == ChunkType::Text)
        .map(|c| c.id.clone())
        .collect();

    info!(
        %knowledge_id,
        chunk_count = chunks.len(),
        has_text_chunks,
        "processChunks completed"
    );

    Ok(ProcessChunksOutcome {
        has_text_chunks,
        text_chunk_ids,
    })
}

async fn commit_knowledge(
    db: &SurrealDbClient,
    knowledge_id: &str,
    storage_size: u64,
    has_text_chunks: bool,
) -> Result<(), AppError> {
    let summary_status = if has_text_chunks {
        SummaryStatus::Pending
    } else {
        SummaryStatus::NotStarted
    };
    db.client
        .query(
            "UPDATE type::thing('knowledge', $id) SET
                parse_status = 'completed',
                enable_status = true,
                storage_size = $storage_size,
                processed_at = time::now(),
                summary_status = $summary_status",
        )
        .bind(("id", knowledge_id.to_string()))
        .bind(("storage_size", storage_size))
        .bind(("summary_status", serde_json::to_value(&summary_status).unwrap()))
        .await?;
    Ok(())
}

async fn fail_knowledge(db: &SurrealDbClient, knowledge_id: &str, message: String) -> Result<(), AppError> {
    db.client
        .query("UPDATE type::thing('knowledge', $id) SET parse_status = 'failed', error_message = $message")
        .bind(("id", knowledge_id.to_string()))
        .bind(("message", message))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::types::knowledge::KnowledgeType;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct NoopEmbedder;

    #[async_trait]
    impl Embedder for NoopEmbedder {
        async fn embed(&self, _input: &str, _model: &str, dimensions: u32) -> Result<Vec<f32>, AppError> {
            Ok(vec![0.0; dimensions as usize])
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        indexed: Mutex<Vec<IndexBatchEntry>>,
    }

    #[async_trait]
    impl RetrieveEngine for RecordingEngine {
        async fn retrieve(
            &self,
            _params: &common::utils::contracts::RetrieveParams,
        ) -> Result<Vec<common::utils::contracts::RetrievedHit>, AppError> {
            Ok(vec![])
        }
        async fn batch_index(&self, entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
            self.indexed.lock().unwrap().extend(entries);
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
        fn estimate_storage_size(&self, entries: &[IndexBatchEntry]) -> u64 {
            entries.len() as u64 * 128
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
        async fn batch_update_chunk_enabled_status(
            &self,
            _updates: &HashMap<String, bool>,
        ) -> Result<(), AppError> {
            Ok(())
        }
        fn supports_retriever(&self, _kind: &str) -> bool {
            true
        }
    }

    async fn setup() -> (SurrealDbClient, Knowledge, Tenant) {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let tenant = Tenant::new(
            "acme".into(),
            1_000_000,
            vec![],
            "text-embedding-3-small".into(),
            "gpt-4o-mini".into(),
        );
        db.store_item(tenant.clone()).await.unwrap();

        let knowledge = Knowledge::new(
            tenant.id.clone(),
            "kb1".into(),
            KnowledgeType::Document,
            "doc".into(),
            Some("hash1".into()),
            Some("/tmp/doc".into()),
            0,
        );
        db.store_item(knowledge.clone()).await.unwrap();

        (db, knowledge, tenant)
    }

    #[tokio::test]
    async fn processes_simple_text_chunks_and_commits() {
        let (db, knowledge, tenant) = setup().await;
        let engine = RecordingEngine::default();
        let embedder = NoopEmbedder;

        let chunks = vec![
            ReaderChunk::new(0, "first paragraph".into(), 0, 16),
            ReaderChunk::new(1, "second paragraph".into(), 16, 33),
        ];

        let outcome = process_chunks(
            &db,
            &engine,
            &embedder,
            "text-embedding-3-small",
            8,
            &knowledge.id,
            chunks,
        )
        .await
        .expect("process_chunks should succeed");

        let updated: Knowledge = db.get_item(&knowledge.id).await.unwrap().unwrap();
        assert_eq!(updated.parse_status, ParseStatus::Completed);
        assert_eq!(updated.summary_status, SummaryStatus::Pending);

        let updated_tenant: Tenant = db.get_item(&tenant.id).await.unwrap().unwrap();
        assert!(updated_tenant.storage_used_bytes > 0);

        assert_eq!(engine.indexed.lock().unwrap().len(), 2);
        assert!(outcome.has_text_chunks);
        assert_eq!(outcome.text_chunk_ids.len(), 2);
    }

    #[tokio::test]
    async fn aborts_silently_when_knowledge_already_deleting() {
        let (db, mut knowledge, _tenant) = setup().await;
        knowledge.parse_status = ParseStatus::Deleting;
        db.store_item(knowledge.clone()).await.unwrap();

        let engine = RecordingEngine::default();
        let embedder = NoopEmbedder;
        let result = process_chunks(
            &db,
            &engine,
            &embedder,
            "text-embedding-3-small",
            8,
            &knowledge.id,
            vec![ReaderChunk::new(0, "content".into(), 0, 7)],
        )
        .await;

        let outcome = result.expect("deletion race should abort silently, not error");
        assert!(!outcome.has_text_chunks);
        assert!(engine.indexed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reader_chunks_are_trimmed_away() {
        let (db, knowledge, _tenant) = setup().await;
        let engine = RecordingEngine::default();
        let embedder = NoopEmbedder;

        process_chunks(
            &db,
            &engine,
            &embedder,
            "text-embedding-3-small",
            8,
            &knowledge.id,
            vec![ReaderChunk::new(0, "   ".into(), 0, 3)],
        )
        .await
        .expect("process_chunks should succeed even with no content");

        assert!(engine.indexed.lock().unwrap().is_empty());
    }
}
