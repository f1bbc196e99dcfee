use std::cmp::Ordering;
use std::collections::HashMap;

/// Reciprocal Rank Fusion constant from the hybrid retrieval contract.
pub const RRF_K: f32 = 60.0;

/// One retriever's ranked output: chunk ids in descending-score order, plus
/// the raw score each one carried (kept for the vector-only fallback path).
pub struct RankedList {
    pub chunk_ids: Vec<String>,
    pub scores: HashMap<String, f32>,
}

/// Deduplicates `vector_chunk_ids` by first occurrence, sorted by descending
/// embedding score. Used when the keyword retriever returned nothing.
pub fn dedup_vector_only(vector: &RankedList) -> Vec<(String, f32)> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<(String, f32)> = vector
        .chunk_ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .map(|id| (id.clone(), vector.scores.get(id).copied().unwrap_or(0.0)))
        .collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    out
}

/// Reciprocal Rank Fusion across an arbitrary number of ranked retriever
/// outputs. For a chunk at 1-indexed rank `p` in retriever `r`, contributes
/// `1 / (k + p)`; per-chunk contributions are summed, then sorted descending.
/// Commutative in retriever order by construction (pure sum over a set).
pub fn reciprocal_rank_fusion(retrievers: &[RankedList]) -> Vec<(String, f32)> {
    let mut totals: HashMap<String, f32> = HashMap::new();
    for retriever in retrievers {
        for (idx, chunk_id) in retriever.chunk_ids.iter().enumerate() {
            let rank = idx as f32 + 1.0;
            let contribution = 1.0 / (RRF_K + rank);
            *totals.entry(chunk_id.clone()).or_insert(0.0) += contribution;
        }
    }

    let mut fused: Vec<(String, f32)> = totals.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    fused
}
