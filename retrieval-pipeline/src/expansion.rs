use std::collections::{HashMap, HashSet};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::{Chunk, ChunkType};
use common::utils::contracts::MatchType;

/// A selected chunk tagged with the reason it's in the result set.
#[derive(Debug, Clone)]
pub struct MatchedChunk {
    pub chunk: Chunk,
    pub match_type: MatchType,
}

/// Fetches the parent/relation/near-by chunks for `selected` in a single
/// batch, tagging each with the match type it was expanded from. Only
/// chunks not already present in `selected` are returned.
pub async fn expand_chunks(db: &SurrealDbClient, selected: &[MatchedChunk]) -> Result<Vec<MatchedChunk>, AppError> {
    let already_present: HashSet<String> = selected.iter().map(|m| m.chunk.id.clone()).collect();

    let mut to_fetch: HashMap<String, MatchType> = HashMap::new();
    for matched in selected {
        if let Some(parent_id) = &matched.chunk.parent_chunk_id {
            to_fetch.entry(parent_id.clone()).or_insert(MatchType::ParentChunk);
        }
        for relation_id in &matched.chunk.relation_chunks {
            to_fetch
                .entry(relation_id.clone())
                .or_insert(MatchType::RelationChunk);
        }
        if matched.chunk.chunk_type == ChunkType::Text {
            if let Some(pre_id) = &matched.chunk.pre_chunk_id {
                to_fetch.entry(pre_id.clone()).or_insert(MatchType::NearByChunk);
            }
            if let Some(next_id) = &matched.chunk.next_chunk_id {
                to_fetch.entry(next_id.clone()).or_insert(MatchType::NearByChunk);
            }
        }
    }

    to_fetch.retain(|id, _| !already_present.contains(id));
    if to_fetch.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = to_fetch.keys().cloned().collect();
    let sql = "SELECT * FROM chunk WHERE id IN $ids";
    let mut response = db.client.query(sql).bind(("ids", ids)).await?;
    let fetched: Vec<Chunk> = response.take(0)?;

    Ok(fetched
        .into_iter()
        .filter_map(|chunk| {
            to_fetch
                .get(&chunk.id)
                .copied()
                .map(|match_type| MatchedChunk { chunk, match_type })
        })
        .collect())
}

/// Only chunks in these types are emitted in the final assembled result.
pub fn is_emittable(chunk_type: &ChunkType) -> bool {
    matches!(chunk_type, ChunkType::Text | ChunkType::Summary | ChunkType::Faq)
}
