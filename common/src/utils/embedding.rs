use async_openai::types::CreateEmbeddingRequestArgs;
use tracing::debug;

use crate::error::AppError;

/// Generates an embedding vector using a specific model and dimension.
///
/// The caller resolves `model`/`dimensions` from the knowledge base (falling back
/// to tenant, then global, defaults) before calling this — there is no implicit
/// settings lookup here.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}
