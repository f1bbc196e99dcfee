use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::{Chunk, ChunkType};
use common::storage::types::knowledge::{Knowledge, SummaryStatus};
use common::storage::types::knowledge_base::KnowledgeBase;
use common::storage::types::message::{Message, MessageRole};
use common::storage::types::tenant::Tenant;
use common::utils::contracts::IndexBatchEntry;
use tracing::warn;

use crate::context::OrchestratorContext;

const SUMMARY_PROMPT: &str = "Summarize the following document in a few sentences, \
    preserving the key facts a reader would search for:\n\n";

/// Handles the `SummaryGeneration` task: produces a single `Summary` chunk for
/// a Knowledge's text chunks and indexes it. Idempotency key is
/// `(Knowledge ID, summary_status)` — already-terminal knowledge is a no-op.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;
    let knowledge_id = task
        .payload
        .get("knowledge_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("summary_generation payload missing knowledge_id".into()))?;

    let knowledge: Knowledge = match ctx.db.get_item(knowledge_id).await? {
        Some(k) => k,
        None => return Ok(()),
    };

    if matches!(knowledge.summary_status, SummaryStatus::Completed | SummaryStatus::Failed) {
        return Ok(());
    }

    match generate_summary(ctx, &knowledge).await {
        Ok(()) => {
            mark_summary_status(ctx, knowledge_id, SummaryStatus::Completed).await?;
            Ok(())
        }
        Err(err) => on_failure(ctx, knowledge_id, retry_count, max_retry, err).await,
    }
}

async fn generate_summary(ctx: &OrchestratorContext, knowledge: &Knowledge) -> Result<(), AppError> {
    let kb: KnowledgeBase = ctx
        .db
        .get_item(&knowledge.kb_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("knowledge base {} not found", knowledge.kb_id)))?;
    let tenant: Tenant = ctx
        .db
        .get_item(&knowledge.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("tenant {} not found", knowledge.tenant_id)))?;

    let text_chunks = Chunk::list_by_knowledge_id(&ctx.db, &knowledge.id).await?;
    let mut text_chunks: Vec<Chunk> = text_chunks.into_iter().filter(|c| c.chunk_type == ChunkType::Text).collect();
    if text_chunks.is_empty() {
        return Ok(());
    }
    text_chunks.sort_by_key(|c| c.chunk_index);

    let document_text = text_chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n\n");
    let prompt = format!("{SUMMARY_PROMPT}{document_text}");
    let chat_model = kb.summary_model_id.clone().unwrap_or(tenant.default_chat_model_id.clone());
    let summary_text = ctx
        .chat_model
        .complete(&chat_model, &[Message::new(knowledge.id.clone(), MessageRole::User, prompt, None)])
        .await?;

    let summary_chunk = Chunk::new(
        knowledge.tenant_id.clone(),
        knowledge.id.clone(),
        knowledge.kb_id.clone(),
        text_chunks.len() as u32,
        summary_text.clone(),
        ChunkType::Summary,
    );
    ctx.db.store_item(summary_chunk.clone()).await?;

    let embedding_model = kb.effective_embedding_model(&tenant.default_embedding_model_id).to_string();
    let embedding = ctx.embedder.embed(&summary_text, &embedding_model, ctx.embedding_dimensions).await?;
    ctx.retrieve_engine
        .batch_index(vec![IndexBatchEntry {
            source_id: summary_chunk.id.clone(),
            chunk_id: summary_chunk.id.clone(),
            knowledge_id: knowledge.id.clone(),
            kb_id: knowledge.kb_id.clone(),
            content: summary_text,
            embedding,
        }])
        .await?;

    Chunk::mark_indexed(&ctx.db, &summary_chunk.id).await?;
    Ok(())
}

async fn on_failure(ctx: &OrchestratorContext, knowledge_id: &str, retry_count: u32, max_retry: u32, err: AppError) -> Result<(), AppError> {
    match &err {
        AppError::QuotaExceeded(message) | AppError::FatalExternal(message) => {
            mark_summary_status(ctx, knowledge_id, SummaryStatus::Failed).await?;
            warn!(knowledge_id, %message, "summary generation failed fatally");
            Ok(())
        }
        _ if err.is_retryable() => {
            if retry_count.saturating_add(1) >= max_retry {
                mark_summary_status(ctx, knowledge_id, SummaryStatus::Failed).await?;
            }
            Err(err)
        }
        _ => {
            warn!(knowledge_id, error = %err, "non-retryable summary_generation failure");
            mark_summary_status(ctx, knowledge_id, SummaryStatus::Failed).await?;
            Ok(())
        }
    }
}

async fn mark_summary_status(ctx: &OrchestratorContext, knowledge_id: &str, status: SummaryStatus) -> Result<(), AppError> {
    let status_str = match status {
        SummaryStatus::NotStarted => "not_started",
        SummaryStatus::Pending => "pending",
        SummaryStatus::Completed => "completed",
        SummaryStatus::Failed => "failed",
    };
    ctx.db
        .client
        .query("UPDATE type::thing('knowledge', $id) SET summary_status = $status")
        .bind(("id", knowledge_id.to_string()))
        .bind(("status", status_str.to_string()))
        .await?;
    Ok(())
}
