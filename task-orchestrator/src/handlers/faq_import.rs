use std::time::Duration;

use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::{Chunk, ChunkType};
use common::storage::types::knowledge::{Knowledge, ParseStatus};
use common::storage::types::knowledge_base::{FaqIndexMode, KnowledgeBase, QuestionIndexMode};
use common::storage::types::task_progress::{TaskProgress, FAQ_IMPORT_PROGRESS_TTL_SECS};
use common::storage::types::StoredObject;
use common::utils::contracts::IndexBatchEntry;
use faq_subsystem::diff::{dedup_entries, plan_append, plan_replace, ImportMode};
use faq_subsystem::entry::FaqEntry;
use tracing::warn;

use crate::context::OrchestratorContext;
use crate::progress;

const BATCH_SIZE: usize = 50;

/// Handles the `FaqImport` task: dedups and diffs the incoming entries against
/// the KB's current FAQ chunks, then creates/deletes/re-indexes in batches of
/// `BATCH_SIZE`, checkpointing progress after each batch so a crash mid-import
/// resumes rather than redoing completed work.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;

    let kb_id = task
        .payload
        .get("kb_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("faq_import payload missing kb_id".into()))?
        .to_string();
    let knowledge_id = task
        .payload
        .get("knowledge_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("faq_import payload missing knowledge_id".into()))?
        .to_string();
    let mode: ImportMode = task
        .payload
        .get("mode")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| AppError::Validation(format!("faq_import payload has invalid mode: {e}")))?
        .ok_or_else(|| AppError::Validation("faq_import payload missing mode".into()))?;
    let entries: Vec<FaqEntry> = task
        .payload
        .get("entries")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| AppError::Validation(format!("faq_import payload has invalid entries: {e}")))?
        .ok_or_else(|| AppError::Validation("faq_import payload missing entries".into()))?;

    if let Some(existing) = progress::load(ctx.kv.as_ref(), &task.id).await? {
        if existing.status == common::storage::types::task_progress::TaskProgressStatus::Completed {
            return Ok(());
        }
    }

    if entries.is_empty() {
        return Err(AppError::Validation("faq_import entries must not be empty".into()));
    }

    match run_import(ctx, &task.id, &kb_id, &knowledge_id, mode, entries).await {
        Ok(()) => {
            mark_knowledge(ctx, &knowledge_id, ParseStatus::Completed, None).await?;
            progress::release_faq_import_lock(ctx.kv.as_ref(), &kb_id).await?;
            Ok(())
        }
        Err(err) => on_failure(ctx, &task.id, &kb_id, &knowledge_id, retry_count, max_retry, err).await,
    }
}

async fn run_import(
    ctx: &OrchestratorContext,
    task_id: &str,
    kb_id: &str,
    knowledge_id: &str,
    mode: ImportMode,
    entries: Vec<FaqEntry>,
) -> Result<(), AppError> {
    let knowledge: Knowledge = ctx
        .db
        .get_item(knowledge_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("knowledge {knowledge_id} not found")))?;
    let kb: KnowledgeBase = ctx
        .db
        .get_item(kb_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("knowledge base {kb_id} not found")))?;

    Chunk::delete_stored_by_knowledge_id(&ctx.db, knowledge_id).await?;
    let existing = Chunk::list_by_kb_and_type(&ctx.db, kb_id, ChunkType::Faq).await?;

    let resumed = progress::load(ctx.kv.as_ref(), task_id).await?.map(|p| p.processed).unwrap_or(0) as usize;

    let diff = match mode {
        ImportMode::Append => {
            let deduped = dedup_entries(entries, &existing, ImportMode::Append);
            let remaining = deduped.into_iter().skip(resumed).collect::<Vec<_>>();
            plan_append(remaining)
        }
        ImportMode::Replace => {
            let deduped = dedup_entries(entries, &[], ImportMode::Replace);
            plan_replace(deduped, &existing)
        }
    };

    let total = (diff.to_create.len() + diff.to_delete.len()) as u64;
    let mut progress = progress::load(ctx.kv.as_ref(), task_id)
        .await?
        .unwrap_or_else(|| TaskProgress::new(task_id.to_string(), kb_id.to_string(), total));
    progress.total = total;
    let ttl = Duration::from_secs(FAQ_IMPORT_PROGRESS_TTL_SECS);

    if !diff.to_delete.is_empty() {
        let ids: Vec<String> = diff.to_delete.iter().map(|c| c.id.clone()).collect();
        ctx.retrieve_engine.delete_by_chunk_id_list(&ids).await?;
        Chunk::delete_by_id_list(&ctx.db, &ids).await?;
        progress.advance(ids.len() as u64, Some("deleted stale faq chunks".into()));
        progress::save(ctx.kv.as_ref(), &progress, ttl).await?;
    }

    let mut next_chunk_index = existing.iter().map(|c| c.chunk_index).max().map(|i| i + 1).unwrap_or(0);
    let mut created = 0u64;
    for batch in diff.to_create.chunks(BATCH_SIZE) {
        for entry in batch {
            let chunk = entry.to_chunk(
                knowledge.tenant_id.clone(),
                knowledge_id.to_string(),
                kb_id.to_string(),
                next_chunk_index,
            )?;
            next_chunk_index += 1;
            ctx.db.store_item(chunk.clone()).await?;

            let index_entries = build_index_entries(ctx, &chunk, &kb).await?;
            ctx.retrieve_engine.batch_index(index_entries).await?;
            Chunk::mark_indexed(&ctx.db, &chunk.id).await?;
        }
        created += batch.len() as u64;
        progress.advance(progress.processed + batch.len() as u64, Some(format!("imported {created} faq entries")));
        progress::save(ctx.kv.as_ref(), &progress, ttl).await?;
    }

    progress.complete();
    progress::save(ctx.kv.as_ref(), &progress, ttl).await?;
    Ok(())
}

/// Builds the index entries for one FAQ chunk, honoring the KB's FAQ config:
/// `question_index_mode` decides whether each question gets its own index
/// entry or they share one; `index_mode` decides whether the answer text is
/// folded into the indexed content.
async fn build_index_entries(ctx: &OrchestratorContext, chunk: &Chunk, kb: &KnowledgeBase) -> Result<Vec<IndexBatchEntry>, AppError> {
    let metadata = chunk
        .faq_metadata
        .as_ref()
        .ok_or_else(|| AppError::InternalError("faq chunk missing faq_metadata".into()))?;

    let answer_suffix = match kb.faq.index_mode {
        FaqIndexMode::QuestionAnswer => format!(" {}", metadata.answers.join(" ")),
        FaqIndexMode::QuestionOnly => String::new(),
    };

    let mut questions = vec![metadata.standard_question.clone()];
    questions.extend(metadata.similar_questions.clone());

    match kb.faq.question_index_mode {
        QuestionIndexMode::Combined => {
            let content = format!("{}{answer_suffix}", questions.join(" "));
            let embedding = ctx.embedder.embed(&content, &ctx.embedding_model, ctx.embedding_dimensions).await?;
            Ok(vec![IndexBatchEntry {
                source_id: chunk.id.clone(),
                chunk_id: chunk.id.clone(),
                knowledge_id: chunk.knowledge_id.clone(),
                kb_id: chunk.kb_id.clone(),
                content,
                embedding,
            }])
        }
        QuestionIndexMode::Separate => {
            let mut out = Vec::with_capacity(questions.len());
            for (i, question) in questions.iter().enumerate() {
                let content = format!("{question}{answer_suffix}");
                let embedding = ctx.embedder.embed(&content, &ctx.embedding_model, ctx.embedding_dimensions).await?;
                out.push(IndexBatchEntry {
                    source_id: format!("{}:{i}", chunk.id),
                    chunk_id: chunk.id.clone(),
                    knowledge_id: chunk.knowledge_id.clone(),
                    kb_id: chunk.kb_id.clone(),
                    content,
                    embedding,
                });
            }
            Ok(out)
        }
    }
}

async fn on_failure(
    ctx: &OrchestratorContext,
    task_id: &str,
    kb_id: &str,
    knowledge_id: &str,
    retry_count: u32,
    max_retry: u32,
    err: AppError,
) -> Result<(), AppError> {
    match &err {
        AppError::QuotaExceeded(message) | AppError::FatalExternal(message) => {
            fail_import(ctx, task_id, kb_id, knowledge_id, message.clone()).await?;
            Ok(())
        }
        _ if err.is_retryable() => {
            if retry_count.saturating_add(1) >= max_retry {
                fail_import(ctx, task_id, kb_id, knowledge_id, err.to_string()).await?;
            }
            Err(err)
        }
        _ => {
            warn!(kb_id, error = %err, "non-retryable faq_import failure");
            fail_import(ctx, task_id, kb_id, knowledge_id, err.to_string()).await?;
            Ok(())
        }
    }
}

async fn fail_import(ctx: &OrchestratorContext, task_id: &str, kb_id: &str, knowledge_id: &str, message: String) -> Result<(), AppError> {
    mark_knowledge(ctx, knowledge_id, ParseStatus::Failed, Some(message.clone())).await?;
    if let Some(mut progress) = progress::load(ctx.kv.as_ref(), task_id).await? {
        progress.fail(message);
        progress::save(ctx.kv.as_ref(), &progress, Duration::from_secs(FAQ_IMPORT_PROGRESS_TTL_SECS)).await?;
    }
    progress::release_faq_import_lock(ctx.kv.as_ref(), kb_id).await?;
    Ok(())
}

async fn mark_knowledge(ctx: &OrchestratorContext, knowledge_id: &str, status: ParseStatus, message: Option<String>) -> Result<(), AppError> {
    let status_str = match status {
        ParseStatus::Completed => "completed",
        ParseStatus::Failed => "failed",
        _ => "processing",
    };
    ctx.db
        .client
        .query("UPDATE type::thing('knowledge', $id) SET parse_status = $status, error_message = $message")
        .bind(("id", knowledge_id.to_string()))
        .bind(("status", status_str.to_string()))
        .bind(("message", message))
        .await?;
    Ok(())
}
