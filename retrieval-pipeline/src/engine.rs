use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::index_info::IndexInfo;
use common::utils::contracts::{Embedder, IndexBatchEntry, MatchType, RetrieveEngine, RetrieveParams, RetrievedHit, RetrieverBackend};
use serde::Deserialize;

/// Reference `RetrieveEngine` backed by SurrealDB's HNSW vector index and BM25
/// full-text index over a `source_index` table (see `IndexInfo`). A production
/// deployment swaps this for a dedicated vector/keyword backend behind the same
/// trait; this one exists so the workspace's other crates have something real to
/// run their tests and examples against.
pub struct SurrealRetrieveEngine {
    db: Arc<SurrealDbClient>,
    embedder: Arc<dyn Embedder>,
    embedding_model: String,
    embedding_dimensions: u32,
}

impl SurrealRetrieveEngine {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<dyn Embedder>, embedding_model: String, embedding_dimensions: u32) -> Self {
        Self {
            db,
            embedder,
            embedding_model,
            embedding_dimensions,
        }
    }

    async fn vector_retrieve(&self, params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
        let embedding = self.embedder.embed(&params.query_text, &self.embedding_model, self.embedding_dimensions).await?;

        let mut query = "SELECT source_id, content, vector::similarity::cosine(embedding, $embedding) AS score
            FROM source_index
            WHERE kb_id = $kb_id AND is_enabled = true AND embedding <|$top_k,100|> $embedding"
            .to_string();
        if params.knowledge_type.is_some() {
            query.push_str(" AND knowledge_type = $knowledge_type");
        }
        if params.knowledge_ids.is_some() {
            query.push_str(" AND knowledge_id IN $knowledge_ids");
        }

        let mut request = self
            .db
            .client
            .query(query)
            .bind(("kb_id", params.kb_id.clone()))
            .bind(("embedding", embedding))
            .bind(("top_k", params.top_k as i64));
        if let Some(knowledge_type) = &params.knowledge_type {
            request = request.bind(("knowledge_type", knowledge_type.clone()));
        }
        if let Some(knowledge_ids) = &params.knowledge_ids {
            request = request.bind(("knowledge_ids", knowledge_ids.clone()));
        }

        #[derive(Deserialize)]
        struct Row {
            source_id: String,
            content: String,
            score: f32,
        }
        let rows: Vec<Row> = request.await?.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| RetrievedHit {
                chunk_id: r.source_id,
                content: r.content,
                score: r.score,
                match_type: MatchType::Vector,
            })
            .collect())
    }

    async fn keyword_retrieve(&self, params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
        let mut query = "SELECT source_id, content, search::score(0) AS score
            FROM source_index
            WHERE kb_id = $kb_id AND is_enabled = true AND content @0@ $query_text"
            .to_string();
        if params.knowledge_type.is_some() {
            query.push_str(" AND knowledge_type = $knowledge_type");
        }
        if params.knowledge_ids.is_some() {
            query.push_str(" AND knowledge_id IN $knowledge_ids");
        }
        query.push_str(" ORDER BY score DESC LIMIT $top_k");

        let mut request = self
            .db
            .client
            .query(query)
            .bind(("kb_id", params.kb_id.clone()))
            .bind(("query_text", params.query_text.clone()))
            .bind(("top_k", params.top_k as i64));
        if let Some(knowledge_type) = &params.knowledge_type {
            request = request.bind(("knowledge_type", knowledge_type.clone()));
        }
        if let Some(knowledge_ids) = &params.knowledge_ids {
            request = request.bind(("knowledge_ids", knowledge_ids.clone()));
        }

        #[derive(Deserialize)]
        struct Row {
            source_id: String,
            content: String,
            score: f32,
        }
        let rows: Vec<Row> = request.await?.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| RetrievedHit {
                chunk_id: r.source_id,
                content: r.content,
                score: r.score,
                match_type: MatchType::Keywords,
            })
            .collect())
    }
}

#[async_trait]
impl RetrieveEngine for SurrealRetrieveEngine {
    async fn retrieve(&self, params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
        match params.backend {
            RetrieverBackend::Vector => self.vector_retrieve(params).await,
            RetrieverBackend::Keyword => self.keyword_retrieve(params).await,
        }
    }

    async fn batch_index(&self, entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
        for entry in entries {
            let info = IndexInfo::new(
                entry.content,
                entry.source_id.clone(),
                "chunk".to_string(),
                entry.chunk_id,
                entry.knowledge_id,
                entry.kb_id,
            );
            let mut row = serde_json::to_value(info).map_err(|e| AppError::InternalError(e.to_string()))?;
            row["embedding"] = serde_json::to_value(entry.embedding).map_err(|e| AppError::InternalError(e.to_string()))?;
            self.db
                .client
                .query("UPSERT type::thing('source_index', $id) CONTENT $row")
                .bind(("id", entry.source_id))
                .bind(("row", row))
                .await?;
        }
        Ok(())
    }

    async fn delete_by_knowledge_id_list(&self, knowledge_ids: &[String]) -> Result<(), AppError> {
        if knowledge_ids.is_empty() {
            return Ok(());
        }
        self.db
            .client
            .query("DELETE source_index WHERE knowledge_id IN $ids")
            .bind(("ids", knowledge_ids.to_vec()))
            .await?;
        Ok(())
    }

    async fn delete_by_chunk_id_list(&self, chunk_ids: &[String]) -> Result<(), AppError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.db
            .client
            .query("DELETE source_index WHERE chunk_id IN $ids")
            .bind(("ids", chunk_ids.to_vec()))
            .await?;
        Ok(())
    }

    async fn delete_by_source_id_list(&self, source_ids: &[String]) -> Result<(), AppError> {
        if source_ids.is_empty() {
            return Ok(());
        }
        self.db
            .client
            .query("DELETE source_index WHERE source_id IN $ids")
            .bind(("ids", source_ids.to_vec()))
            .await?;
        Ok(())
    }

    fn estimate_storage_size(&self, entries: &[IndexBatchEntry]) -> u64 {
        entries
            .iter()
            .map(|e| e.content.len() as u64 + (e.embedding.len() as u64) * 4)
            .sum()
    }

    async fn copy_indices(
        &self,
        src_kb: &str,
        dst_kb: &str,
        knowledge_map: &HashMap<String, String>,
        chunk_map: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        #[derive(Deserialize)]
        struct Row {
            source_id: String,
            content: String,
            chunk_id: String,
            knowledge_id: String,
            embedding: Vec<f32>,
        }
        let rows: Vec<Row> = self
            .db
            .client
            .query("SELECT source_id, content, chunk_id, knowledge_id, embedding FROM source_index WHERE kb_id = $kb_id")
            .bind(("kb_id", src_kb.to_string()))
            .await?
            .take(0)?;

        for row in rows {
            let Some(new_chunk_id) = chunk_map.get(&row.chunk_id) else { continue };
            let Some(new_knowledge_id) = knowledge_map.get(&row.knowledge_id) else { continue };
            let new_source_id = row.source_id.replacen(&row.chunk_id, new_chunk_id, 1);
            let info = IndexInfo::new(
                row.content,
                new_source_id.clone(),
                "chunk".to_string(),
                new_chunk_id.clone(),
                new_knowledge_id.clone(),
                dst_kb.to_string(),
            );
            let mut entry = serde_json::to_value(info).map_err(|e| AppError::InternalError(e.to_string()))?;
            entry["embedding"] = serde_json::to_value(row.embedding).map_err(|e| AppError::InternalError(e.to_string()))?;
            self.db
                .client
                .query("UPSERT type::thing('source_index', $id) CONTENT $row")
                .bind(("id", new_source_id))
                .bind(("row", entry))
                .await?;
        }
        Ok(())
    }

    async fn batch_update_chunk_enabled_status(&self, updates: &HashMap<String, bool>) -> Result<(), AppError> {
        for (chunk_id, enabled) in updates {
            self.db
                .client
                .query("UPDATE source_index SET is_enabled = $enabled WHERE chunk_id = $chunk_id")
                .bind(("chunk_id", chunk_id.clone()))
                .bind(("enabled", *enabled))
                .await?;
        }
        Ok(())
    }

    fn supports_retriever(&self, kind: &str) -> bool {
        matches!(kind, "vector" | "keyword")
    }
}
