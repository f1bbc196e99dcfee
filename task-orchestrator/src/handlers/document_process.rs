use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::file_info::FileInfo;
use common::storage::types::knowledge::{Knowledge, KnowledgeType, ParseStatus};
use common::storage::types::knowledge_base::KnowledgeBase;
use common::storage::types::task::TaskKind;
use common::storage::types::StoredObject;
use common::utils::contracts::ReaderChunk;
use ingestion_pipeline::chunking::split_into_reader_chunks;
use ingestion_pipeline::{process_chunks, ProcessChunksOutcome};
use tracing::warn;

use crate::context::OrchestratorContext;

/// Handles the `DocumentProcess` task: reads the source, chunks it, and runs
/// it through the full `processChunks` pipeline. Idempotency key is
/// `(Knowledge ID, parse_status)`.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;
    let knowledge_id = task
        .payload
        .get("knowledge_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("document_process payload missing knowledge_id".into()))?;

    let knowledge: Knowledge = match ctx.db.get_item(knowledge_id).await? {
        Some(k) => k,
        None => return Ok(()),
    };

    if matches!(
        knowledge.parse_status,
        ParseStatus::Completed | ParseStatus::Failed | ParseStatus::Deleting | ParseStatus::Draft
    ) {
        return Ok(());
    }

    let kb: KnowledgeBase = ctx
        .db
        .get_item(&knowledge.kb_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("knowledge base {} not found", knowledge.kb_id)))?;

    match read_source(ctx, &knowledge, &kb).await {
        Ok(reader_chunks) => {
            match process_chunks(
                &ctx.db,
                ctx.retrieve_engine.as_ref(),
                ctx.embedder.as_ref(),
                &ctx.embedding_model,
                ctx.embedding_dimensions,
                knowledge_id,
                reader_chunks,
            )
            .await
            {
                Ok(outcome) => enqueue_follow_up_tasks(ctx, &kb, knowledge_id, &outcome).await,
                Err(err) => on_failure(ctx, &knowledge, retry_count, max_retry, err).await,
            }
        }
        Err(err) => on_failure(ctx, &knowledge, retry_count, max_retry, err).await,
    }
}

/// Step 11: enqueues whatever extraction work the KB's config and the
/// produced chunks warrant. A failure to enqueue does not fail the task:
/// the Knowledge is already committed, so we log and move on rather than
/// re-run the whole pipeline over an enqueue hiccup.
async fn enqueue_follow_up_tasks(
    ctx: &OrchestratorContext,
    kb: &KnowledgeBase,
    knowledge_id: &str,
    outcome: &ProcessChunksOutcome,
) -> Result<(), AppError> {
    if !outcome.has_text_chunks {
        return Ok(());
    }

    if kb.extract.summary_enabled {
        enqueue(ctx, TaskKind::SummaryGeneration, serde_json::json!({ "knowledge_id": knowledge_id })).await;
    }
    if kb.extract.question_generation_enabled {
        enqueue(ctx, TaskKind::QuestionGeneration, serde_json::json!({ "knowledge_id": knowledge_id })).await;
    }
    if kb.extract.graph_enabled {
        for chunk_id in &outcome.text_chunk_ids {
            enqueue(ctx, TaskKind::ChunkExtract, serde_json::json!({ "chunk_id": chunk_id })).await;
        }
    }

    Ok(())
}

async fn enqueue(ctx: &OrchestratorContext, kind: TaskKind, payload: serde_json::Value) {
    if let Err(err) = ctx.queue.enqueue(kind.clone(), payload, kind.queue_name(), kind.max_retry()).await {
        warn!(?kind, error = %err, "failed to enqueue follow-up task");
    }
}

/// Produces the reader chunks for a Knowledge based on its source kind:
/// uploaded files and URLs are already chunked by the external `DocReader`;
/// inline passage/manual text is split here with the KB's token bounds.
async fn read_source(ctx: &OrchestratorContext, knowledge: &Knowledge, kb: &KnowledgeBase) -> Result<Vec<ReaderChunk>, AppError> {
    match knowledge.knowledge_type {
        KnowledgeType::Faq => Err(AppError::Validation(
            "faq-typed knowledge is ingested by the FaqImport task, not DocumentProcess".into(),
        )),
        KnowledgeType::Url => {
            let url = knowledge
                .file_path
                .as_deref()
                .ok_or_else(|| AppError::Validation("url knowledge missing file_path".into()))?;
            ctx.doc_reader.read_from_url(url).await
        }
        KnowledgeType::Document if knowledge.file_hash.is_some() => {
            let location = knowledge
                .file_path
                .as_deref()
                .ok_or_else(|| AppError::Validation("file knowledge missing file_path".into()))?;
            let bytes = ctx.file_service.get(location).await?;
            let mime_type = FileInfo::guess_mime_type(&knowledge.title);
            ctx.doc_reader.read_from_file(&mime_type, &bytes).await
        }
        KnowledgeType::Document => {
            let text = knowledge
                .file_path
                .as_deref()
                .ok_or_else(|| AppError::Validation("passage knowledge missing text".into()))?;
            let (min_tokens, max_tokens) = (resolve_min_tokens(&kb.chunking), kb.chunking.max_tokens);
            split_into_reader_chunks(text, min_tokens, max_tokens, kb.chunking.overlap_tokens)
        }
    }
}

/// `ChunkingConfig` only carries `max_tokens`/`overlap_tokens`; the splitter
/// also wants a minimum, so this derives one that always clears the overlap.
fn resolve_min_tokens(chunking: &common::storage::types::knowledge_base::ChunkingConfig) -> usize {
    let halfway = chunking.max_tokens / 2;
    halfway.max(chunking.overlap_tokens + 1).min(chunking.max_tokens.max(1))
}

async fn on_failure(ctx: &OrchestratorContext, knowledge: &Knowledge, retry_count: u32, max_retry: u32, err: AppError) -> Result<(), AppError> {
    match &err {
        AppError::QuotaExceeded(message) | AppError::FatalExternal(message) => {
            fail_knowledge(ctx, &knowledge.id, message.clone()).await?;
            Ok(())
        }
        _ if err.is_retryable() => {
            if retry_count.saturating_add(1) >= max_retry {
                fail_knowledge(ctx, &knowledge.id, err.to_string()).await?;
            }
            Err(err)
        }
        _ => {
            warn!(knowledge_id = %knowledge.id, error = %err, "non-retryable document_process failure");
            fail_knowledge(ctx, &knowledge.id, err.to_string()).await?;
            Ok(())
        }
    }
}

async fn fail_knowledge(ctx: &OrchestratorContext, knowledge_id: &str, message: String) -> Result<(), AppError> {
    ctx.db
        .client
        .query("UPDATE type::thing('knowledge', $id) SET parse_status = 'failed', error_message = $message")
        .bind(("id", knowledge_id.to_string()))
        .bind(("message", message))
        .await?;
    Ok(())
}
