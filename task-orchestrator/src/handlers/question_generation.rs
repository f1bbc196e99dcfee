use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::{Chunk, ChunkType, GeneratedQuestion};
use common::storage::types::knowledge::Knowledge;
use common::storage::types::knowledge_base::KnowledgeBase;
use common::storage::types::message::{Message, MessageRole};
use common::storage::types::tenant::Tenant;
use common::utils::contracts::IndexBatchEntry;
use tracing::warn;

use crate::context::OrchestratorContext;

const QUESTION_PROMPT: &str = "List up to five distinct questions this passage answers, one per line:\n\n";

/// Handles the `QuestionGeneration` task. Unlike the other consumers this one
/// has no terminal state to short-circuit on: the idempotency key is the
/// Knowledge ID and every run simply re-overwrites the generated questions.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;
    let knowledge_id = task
        .payload
        .get("knowledge_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("question_generation payload missing knowledge_id".into()))?;

    let knowledge: Knowledge = match ctx.db.get_item(knowledge_id).await? {
        Some(k) => k,
        None => return Ok(()),
    };

    match regenerate_questions(ctx, &knowledge).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_retryable() && retry_count.saturating_add(1) < max_retry => Err(err),
        Err(err) => {
            warn!(knowledge_id, error = %err, "question_generation gave up after exhausting retries");
            Ok(())
        }
    }
}

async fn regenerate_questions(ctx: &OrchestratorContext, knowledge: &Knowledge) -> Result<(), AppError> {
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

    let chunks = Chunk::list_by_knowledge_id(&ctx.db, &knowledge.id).await?;
    let embedding_model = kb.effective_embedding_model(&tenant.default_embedding_model_id).to_string();

    for mut chunk in chunks.into_iter().filter(|c| c.chunk_type == ChunkType::Text) {
        let old_source_ids: Vec<String> = chunk
            .metadata
            .as_ref()
            .and_then(|m| m.get("generated_questions"))
            .and_then(|v| serde_json::from_value::<Vec<GeneratedQuestion>>(v.clone()).ok())
            .map(|questions| (0..questions.len()).map(|i| format!("{}-{i}", chunk.id)).collect())
            .unwrap_or_default();
        if !old_source_ids.is_empty() {
            ctx.retrieve_engine.delete_by_source_id_list(&old_source_ids).await?;
        }

        let prompt = format!("{QUESTION_PROMPT}{}", chunk.content);
        let raw = ctx
            .chat_model
            .complete(&tenant.default_chat_model_id, &[Message::new(knowledge.id.clone(), MessageRole::User, prompt, None)])
            .await?;
        let questions: Vec<GeneratedQuestion> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| GeneratedQuestion {
                text: line.to_string(),
                source: chunk.id.clone(),
            })
            .collect();

        let mut entries = Vec::with_capacity(questions.len());
        for (i, question) in questions.iter().enumerate() {
            let embedding = ctx.embedder.embed(&question.text, &embedding_model, ctx.embedding_dimensions).await?;
            entries.push(IndexBatchEntry {
                source_id: format!("{}-{i}", chunk.id),
                chunk_id: chunk.id.clone(),
                knowledge_id: knowledge.id.clone(),
                kb_id: knowledge.kb_id.clone(),
                content: question.text.clone(),
                embedding,
            });
        }
        if !entries.is_empty() {
            ctx.retrieve_engine.batch_index(entries).await?;
        }

        let mut metadata = chunk.metadata.clone().unwrap_or_else(|| serde_json::json!({}));
        metadata["generated_questions"] = serde_json::to_value(&questions).map_err(|e| AppError::InternalError(e.to_string()))?;
        chunk.metadata = Some(metadata);
        ctx.db.store_item(chunk).await?;
    }

    Ok(())
}
