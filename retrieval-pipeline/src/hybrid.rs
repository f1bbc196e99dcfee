use std::collections::HashMap;

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk::Chunk;
use common::storage::types::knowledge_base::KnowledgeBaseType;
use common::utils::contracts::{MatchType, RetrieveEngine, RetrieveParams, RetrievedHit, RetrieverBackend};
use tracing::instrument;

use crate::expansion::{expand_chunks, is_emittable, MatchedChunk};
use crate::faq::{filter_negative_questions, should_continue_iterating, MAX_FAQ_ITERATIONS};
use crate::fusion::{dedup_vector_only, reciprocal_rank_fusion, RankedList};

#[derive(Debug, Clone)]
pub struct HybridSearchParams {
    pub kb_id: String,
    pub kb_type: KnowledgeBaseType,
    pub query_text: String,
    pub match_count: usize,
    pub disable_vector: bool,
    pub disable_keywords: bool,
    pub knowledge_ids: Option<Vec<String>>,
}

fn retrieve_params(params: &HybridSearchParams, backend: RetrieverBackend, top_k: usize) -> RetrieveParams {
    RetrieveParams {
        kb_id: params.kb_id.clone(),
        backend,
        query_text: params.query_text.clone(),
        top_k,
        knowledge_type: matches!(params.kb_type, KnowledgeBaseType::Faq).then(|| "faq".to_string()),
        knowledge_ids: params.knowledge_ids.clone(),
    }
}

fn to_ranked_list(hits: &[RetrievedHit]) -> RankedList {
    let mut scores = HashMap::new();
    let chunk_ids: Vec<String> = hits
        .iter()
        .map(|hit| {
            scores.insert(hit.chunk_id.clone(), hit.score);
            hit.chunk_id.clone()
        })
        .collect();
    RankedList { chunk_ids, scores }
}

async fn fetch_one_round(
    engine: &dyn RetrieveEngine,
    params: &HybridSearchParams,
    top_k: usize,
) -> Result<(Vec<RetrievedHit>, Vec<RetrievedHit>), AppError> {
    let is_faq = matches!(params.kb_type, KnowledgeBaseType::Faq);

    let vector_hits = if params.disable_vector {
        Vec::new()
    } else {
        engine.retrieve(&retrieve_params(params, RetrieverBackend::Vector, top_k)).await?
    };

    let keyword_hits = if params.disable_keywords || is_faq {
        Vec::new()
    } else {
        engine.retrieve(&retrieve_params(params, RetrieverBackend::Keyword, top_k)).await?
    };

    Ok((vector_hits, keyword_hits))
}

fn fuse(vector_hits: &[RetrievedHit], keyword_hits: &[RetrievedHit]) -> Vec<(String, f32)> {
    if keyword_hits.is_empty() {
        dedup_vector_only(&to_ranked_list(vector_hits))
    } else {
        reciprocal_rank_fusion(&[to_ranked_list(vector_hits), to_ranked_list(keyword_hits)])
    }
}

async fn load_chunks(db: &SurrealDbClient, ids: &[String]) -> Result<Vec<Chunk>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = "SELECT * FROM chunk WHERE id IN $ids";
    let mut response = db.client.query(sql).bind(("ids", ids.to_vec())).await?;
    Ok(response.take(0)?)
}

/// Runs the full hybrid-search algorithm: parallel vector/keyword retrieval,
/// fusion, FAQ iterative re-retrieval with negative-question filtering,
/// truncation, and parent/relation/near-by chunk expansion.
#[instrument(skip(db, engine, params), fields(kb_id = %params.kb_id))]
pub async fn hybrid_search(
    db: &SurrealDbClient,
    engine: &dyn RetrieveEngine,
    params: HybridSearchParams,
) -> Result<Vec<MatchedChunk>, AppError> {
    let requested_cap = params.match_count.saturating_mul(3).max(1);
    let is_faq = matches!(params.kb_type, KnowledgeBaseType::Faq);

    let mut best_score: HashMap<String, f32> = HashMap::new();
    let mut origin: HashMap<String, MatchType> = HashMap::new();
    let mut iteration = 0u32;
    let mut top_k = requested_cap;

    loop {
        let (vector_hits, keyword_hits) = fetch_one_round(engine, &params, top_k).await?;
        let vector_ids: std::collections::HashSet<String> =
            vector_hits.iter().map(|h| h.chunk_id.clone()).collect();
        let fused = fuse(&vector_hits, &keyword_hits);

        for (chunk_id, score) in fused {
            origin
                .entry(chunk_id.clone())
                .or_insert(if vector_ids.contains(&chunk_id) {
                    MatchType::Vector
                } else {
                    MatchType::Keywords
                });
            best_score
                .entry(chunk_id)
                .and_modify(|existing| {
                    if score > *existing {
                        *existing = score;
                    }
                })
                .or_insert(score);
        }

        if !is_faq {
            break;
        }

        let ids: Vec<String> = best_score.keys().cloned().collect();
        let candidates = load_chunks(db, &ids).await?;
        let survivors = filter_negative_questions(candidates, &params.query_text);
        let survivor_ids: std::collections::HashSet<String> = survivors.iter().map(|c| c.id.clone()).collect();
        best_score.retain(|id, _| survivor_ids.contains(id));

        let vector_returned = vector_hits.len();
        let keyword_returned = keyword_hits.len();
        let vector_active = !params.disable_vector;
        let keyword_active = !params.disable_keywords && !is_faq;
        if !should_continue_iterating(
            best_score.len(),
            params.match_count,
            vector_returned,
            keyword_returned,
            vector_active,
            keyword_active,
            top_k,
            iteration,
        ) {
            break;
        }

        iteration += 1;
        top_k *= 2;
        if iteration >= MAX_FAQ_ITERATIONS {
            break;
        }
    }

    let mut ranked: Vec<(String, f32)> = best_score.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(params.match_count);

    let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
    let mut chunks = load_chunks(db, &ids).await?;

    if !is_faq {
        chunks = filter_negative_questions(chunks, &params.query_text);
    }

    let chunk_by_id: HashMap<String, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
    let mut selected: Vec<MatchedChunk> = Vec::new();
    for (id, _) in &ranked {
        if let Some(chunk) = chunk_by_id.get(id) {
            let match_type = origin.get(id).copied().unwrap_or(MatchType::Vector);
            selected.push(MatchedChunk {
                chunk: chunk.clone(),
                match_type,
            });
        }
    }

    let expanded = expand_chunks(db, &selected).await?;

    let mut assembled = selected;
    assembled.extend(expanded);
    assembled.retain(|m| is_emittable(&m.chunk.chunk_type));

    Ok(assembled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::types::chunk::ChunkType;
    use common::utils::contracts::IndexBatchEntry;

    struct StaticEngine {
        vector_hits: Vec<RetrievedHit>,
        keyword_hits: Vec<RetrievedHit>,
    }

    #[async_trait]
    impl RetrieveEngine for StaticEngine {
        async fn retrieve(&self, params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
            Ok(match params.backend {
                RetrieverBackend::Vector => self.vector_hits.clone(),
                RetrieverBackend::Keyword => self.keyword_hits.clone(),
            })
        }
        async fn batch_index(&self, _entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
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
        fn estimate_storage_size(&self, _entries: &[IndexBatchEntry]) -> u64 {
            0
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
        async fn batch_update_chunk_enabled_status(&self, _updates: &HashMap<String, bool>) -> Result<(), AppError> {
            Ok(())
        }
        fn supports_retriever(&self, _kind: &str) -> bool {
            true
        }
    }

    async fn store_chunk(db: &SurrealDbClient, content: &str) -> Chunk {
        let chunk = Chunk::new(
            "tenant1".into(),
            "knowledge1".into(),
            "kb1".into(),
            0,
            content.into(),
            ChunkType::Text,
        );
        chunk.store_with_embedding(db, vec![0.1; 4]).await.unwrap();
        chunk
    }

    #[tokio::test]
    async fn match_count_zero_returns_empty() {
        let db = SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let engine = StaticEngine {
            vector_hits: vec![],
            keyword_hits: vec![],
        };

        let params = HybridSearchParams {
            kb_id: "kb1".into(),
            kb_type: KnowledgeBaseType::Document,
            query_text: "hello".into(),
            match_count: 0,
            disable_vector: false,
            disable_keywords: false,
            knowledge_ids: None,
        };

        let result = hybrid_search(&db, &engine, params).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn vector_only_path_preserves_embedding_scores() {
        let db = SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let chunk = store_chunk(&db, "some document text").await;

        let engine = StaticEngine {
            vector_hits: vec![RetrievedHit {
                chunk_id: chunk.id.clone(),
                content: chunk.content.clone(),
                score: 0.77,
                match_type: MatchType::Vector,
            }],
            keyword_hits: vec![],
        };

        let params = HybridSearchParams {
            kb_id: "kb1".into(),
            kb_type: KnowledgeBaseType::Document,
            query_text: "document".into(),
            match_count: 5,
            disable_vector: false,
            disable_keywords: true,
            knowledge_ids: None,
        };

        let result = hybrid_search(&db, &engine, params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.id, chunk.id);
    }
}
