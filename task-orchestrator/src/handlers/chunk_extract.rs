use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::chunk::Chunk;
use common::storage::types::message::{Message, MessageRole};
use common::utils::contracts::GraphNamespace;
use tracing::warn;

use crate::context::OrchestratorContext;
use crate::handlers::graph_rebuild::GRAPH_GENERATION;

const EXTRACT_PROMPT: &str = "Extract entities and relationships from the following passage as a JSON array \
    of {\"subject\":...,\"predicate\":...,\"object\":...} objects. Reply with the JSON array only:\n\n";

const EXTRACTED_MARKER: &str = "graph_extracted";

/// Handles the `ChunkExtract` task: per-chunk graph extraction enqueued after
/// ingestion when the knowledge base's extract config enables it. Idempotency
/// key is the chunk itself: a marker in its metadata records that extraction
/// already ran, since `Chunk` has no dedicated extraction-status field.
pub async fn handle(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    let retry_count = task.retry_count;
    let max_retry = task.max_retry;
    let chunk_id = task
        .payload
        .get("chunk_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Validation("chunk_extract payload missing chunk_id".into()))?;

    let chunk: Chunk = match ctx.db.get_item(chunk_id).await? {
        Some(c) => c,
        None => return Ok(()),
    };
    if chunk.metadata.as_ref().and_then(|m| m.get(EXTRACTED_MARKER)).and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }

    match extract(ctx, chunk).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_retryable() && retry_count.saturating_add(1) < max_retry => Err(err),
        Err(err) => {
            warn!(chunk_id, error = %err, "chunk_extract gave up after exhausting retries");
            Ok(())
        }
    }
}

async fn extract(ctx: &OrchestratorContext, mut chunk: Chunk) -> Result<(), AppError> {
    let prompt = format!("{EXTRACT_PROMPT}{}", chunk.content);
    let raw = ctx
        .chat_model
        .complete(&ctx.embedding_model, &[Message::new(chunk.id.clone(), MessageRole::User, prompt, None)])
        .await?;

    let graph_data: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap_or_default();
    if !graph_data.is_empty() {
        ctx.graph_repository
            .add_graph(
                GraphNamespace {
                    kb_id: chunk.kb_id.clone(),
                    k: GRAPH_GENERATION,
                },
                graph_data,
            )
            .await?;
    }

    let mut metadata = chunk.metadata.clone().unwrap_or_else(|| serde_json::json!({}));
    metadata[EXTRACTED_MARKER] = serde_json::Value::Bool(true);
    chunk.metadata = Some(metadata);
    ctx.db.store_item(chunk).await?;
    Ok(())
}
