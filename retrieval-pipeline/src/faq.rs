use common::storage::types::chunk::{Chunk, ChunkType};
use tracing::warn;

/// Maximum number of FAQ re-retrieval iterations before giving up.
pub const MAX_FAQ_ITERATIONS: u32 = 5;

/// Whether another iteration of FAQ retrieval is warranted: we're still short
/// of `match_count` unique chunks and every retriever actually in play
/// returned a full page (so there may be more to find). A retriever that's
/// disabled for this search (e.g. keyword retrieval for FAQ KBs) is excluded
/// from the check rather than treated as having returned nothing.
pub fn should_continue_iterating(
    unique_count: usize,
    match_count: usize,
    vector_returned: usize,
    keyword_returned: usize,
    vector_active: bool,
    keyword_active: bool,
    requested_cap: usize,
    iteration: u32,
) -> bool {
    iteration < MAX_FAQ_ITERATIONS
        && unique_count < match_count
        && (!vector_active || vector_returned >= requested_cap)
        && (!keyword_active || keyword_returned >= requested_cap)
}

/// Case-insensitive, trimmed equality between `query` and any of the chunk's
/// `negative_questions`. Non-FAQ chunks are always kept. A chunk whose FAQ
/// metadata can't be inspected (e.g. missing, malformed) is kept (fail-open).
pub fn passes_negative_question_filter(chunk: &Chunk, query: &str) -> bool {
    if chunk.chunk_type != ChunkType::Faq {
        return true;
    }

    let Some(metadata) = &chunk.faq_metadata else {
        warn!(chunk_id = %chunk.id, "FAQ chunk missing faq_metadata, keeping (fail-open)");
        return true;
    };

    let normalized_query = query.trim().to_lowercase();
    !metadata
        .negative_questions
        .iter()
        .any(|negative| negative.trim().to_lowercase() == normalized_query)
}

/// Applies the negative-question filter to a batch, preserving order.
pub fn filter_negative_questions(chunks: Vec<Chunk>, query: &str) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| passes_negative_question_filter(chunk, query))
        .collect()
}
