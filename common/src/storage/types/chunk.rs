use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Summary,
    Faq,
    ImageOcr,
    ImageCaption,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Stored,
    Indexed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    All,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
    pub text: String,
    pub source: String,
}

/// Extra metadata carried only by chunks whose `chunk_type` is `Faq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaqChunkMetadata {
    pub standard_question: String,
    pub similar_questions: Vec<String>,
    pub negative_questions: Vec<String>,
    pub answers: Vec<String>,
    pub answer_strategy: AnswerStrategy,
    pub version: u32,
}

impl FaqChunkMetadata {
    pub fn new(standard_question: String, answers: Vec<String>) -> Result<Self, AppError> {
        if answers.is_empty() {
            return Err(AppError::Validation(
                "FAQ chunk requires at least one answer".into(),
            ));
        }
        Ok(Self {
            standard_question,
            similar_questions: Vec::new(),
            negative_questions: Vec::new(),
            answers,
            answer_strategy: AnswerStrategy::All,
            version: 1,
        })
    }

    /// Content hash used to decide whether an incoming FAQ row is a no-op, an
    /// append, or a replace against an existing chunk with the same question.
    ///
    /// `similar_questions`, `negative_questions` and `answers` are sorted before
    /// joining so that reordering them (e.g. via CSV round-trip) never changes
    /// the hash.
    pub fn content_hash(&self) -> String {
        let mut similar = self.similar_questions.clone();
        similar.sort();
        let mut negative = self.negative_questions.clone();
        negative.sort();
        let mut answers = self.answers.clone();
        answers.sort();

        let mut joined = self.standard_question.clone();
        joined.push('\u{1f}');
        joined.push_str(&similar.join("\u{1f}"));
        joined.push('\u{1f}');
        joined.push_str(&negative.join("\u{1f}"));
        joined.push('\u{1f}');
        joined.push_str(&answers.join("\u{1f}"));
        joined.push('\u{1f}');
        joined.push_str(match self.answer_strategy {
            AnswerStrategy::All => "all",
            AnswerStrategy::Random => "random",
        });
        format!("{:x}", md5::compute(joined.as_bytes()))
    }
}

stored_object!(Chunk, "chunk", {
    tenant_id: String,
    knowledge_id: String,
    kb_id: String,
    chunk_index: u32,
    content: String,
    content_hash: Option<String>,
    chunk_type: ChunkType,
    parent_chunk_id: Option<String>,
    pre_chunk_id: Option<String>,
    next_chunk_id: Option<String>,
    relation_chunks: Vec<String>,
    image_info: Option<serde_json::Value>,
    tag_id: Option<String>,
    flags: u32,
    is_enabled: bool,
    status: ChunkStatus,
    faq_metadata: Option<FaqChunkMetadata>,
    metadata: Option<serde_json::Value>
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        knowledge_id: String,
        kb_id: String,
        chunk_index: u32,
        content: String,
        chunk_type: ChunkType,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            knowledge_id,
            kb_id,
            chunk_index,
            content,
            content_hash: None,
            chunk_type,
            parent_chunk_id: None,
            pre_chunk_id: None,
            next_chunk_id: None,
            relation_chunks: Vec::new(),
            image_info: None,
            tag_id: None,
            flags: 0,
            is_enabled: true,
            status: ChunkStatus::Stored,
            faq_metadata: None,
            metadata: None,
        }
    }

    pub async fn delete_by_knowledge_id(
        db: &SurrealDbClient,
        knowledge_id: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE chunk WHERE knowledge_id = $knowledge_id")
            .bind(("knowledge_id", knowledge_id.to_string()))
            .await?;
        Ok(())
    }

    /// Clears partial work left by an interrupted FAQ import: chunks that were
    /// persisted but never made it to `status=indexed`.
    pub async fn delete_stored_by_knowledge_id(db: &SurrealDbClient, knowledge_id: &str) -> Result<(), AppError> {
        db.query("DELETE chunk WHERE knowledge_id = $knowledge_id AND status = 'stored'")
            .bind(("knowledge_id", knowledge_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn list_by_knowledge_id(db: &SurrealDbClient, knowledge_id: &str) -> Result<Vec<Chunk>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM chunk WHERE knowledge_id = $knowledge_id")
            .bind(("knowledge_id", knowledge_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn list_by_kb_and_type(db: &SurrealDbClient, kb_id: &str, chunk_type: ChunkType) -> Result<Vec<Chunk>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM chunk WHERE kb_id = $kb_id AND chunk_type = $chunk_type")
            .bind(("kb_id", kb_id.to_string()))
            .bind(("chunk_type", chunk_type))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn mark_indexed(db: &SurrealDbClient, chunk_id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('chunk', $id) SET status = 'indexed'")
            .bind(("id", chunk_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn delete_by_id_list(db: &SurrealDbClient, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        db.query("DELETE chunk WHERE id IN $ids")
            .bind(("ids", ids.to_vec()))
            .await?;
        Ok(())
    }

    /// Stores the chunk row and its embedding atomically so a reader never
    /// observes a chunk without its vector.
    pub async fn store_with_embedding(
        &self,
        db: &SurrealDbClient,
        embedding: Vec<f32>,
    ) -> Result<(), AppError> {
        let sql = "BEGIN TRANSACTION;
            UPSERT type::thing('chunk', $id) CONTENT $chunk;
            UPSERT type::thing('chunk_embedding', $id) CONTENT { chunk_id: $id, embedding: $embedding };
            COMMIT TRANSACTION;";
        db.client
            .query(sql)
            .bind(("id", self.id.clone()))
            .bind(("chunk", self.clone()))
            .bind(("embedding", embedding))
            .await?;
        Ok(())
    }

    pub async fn vector_search(
        db: &SurrealDbClient,
        kb_id: &str,
        embedding: Vec<f32>,
        take: usize,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        let sql = "SELECT chunk_id, vector::similarity::cosine(embedding, $embedding) AS score
            FROM chunk_embedding
            WHERE embedding <|$take,100|> $embedding
            FETCH chunk_id";
        let mut response = db
            .client
            .query(sql)
            .bind(("embedding", embedding))
            .bind(("take", take as i64))
            .await?;
        #[derive(Deserialize)]
        struct Row {
            chunk_id: Chunk,
            score: f32,
        }
        let rows: Vec<Row> = response.take(0)?;
        Ok(rows
            .into_iter()
            .filter(|r| r.chunk_id.kb_id == kb_id)
            .map(|r| ChunkSearchResult {
                chunk: r.chunk_id,
                score: r.score,
            })
            .collect())
    }

    pub async fn fts_search(
        db: &SurrealDbClient,
        kb_id: &str,
        query: &str,
        take: usize,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        let sql = "SELECT *, search::score(0) AS score
            FROM chunk
            WHERE kb_id = $kb_id AND content @0@ $query
            ORDER BY score DESC
            LIMIT $take";
        let mut response = db
            .client
            .query(sql)
            .bind(("kb_id", kb_id.to_string()))
            .bind(("query", query.to_string()))
            .bind(("take", take as i64))
            .await?;
        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            score: f32,
        }
        let rows: Vec<Row> = response.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk,
                score: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faq_metadata_requires_answers() {
        assert!(FaqChunkMetadata::new("q?".into(), vec![]).is_err());
        assert!(FaqChunkMetadata::new("q?".into(), vec!["a".into()]).is_ok());
    }

    #[test]
    fn content_hash_is_stable_for_same_question_and_answers() {
        let a = FaqChunkMetadata::new("q?".into(), vec!["a".into()]).unwrap();
        let b = FaqChunkMetadata::new("q?".into(), vec!["a".into()]).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_changes_with_answer() {
        let a = FaqChunkMetadata::new("q?".into(), vec!["a".into()]).unwrap();
        let b = FaqChunkMetadata::new("q?".into(), vec!["b".into()]).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_ignores_answer_and_similar_question_ordering() {
        let mut a = FaqChunkMetadata::new("q?".into(), vec!["a1".into(), "a2".into()]).unwrap();
        a.similar_questions = vec!["s1".into(), "s2".into()];

        let mut b = FaqChunkMetadata::new("q?".into(), vec!["a2".into(), "a1".into()]).unwrap();
        b.similar_questions = vec!["s2".into(), "s1".into()];

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[tokio::test]
    async fn store_and_delete_chunk_roundtrip() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.apply_migrations().await.expect("migrations");

        let chunk = Chunk::new(
            "tenant1".into(),
            "knowledge1".into(),
            "kb1".into(),
            0,
            "hello world".into(),
            ChunkType::Text,
        );
        chunk
            .store_with_embedding(&db, vec![0.1; 8])
            .await
            .expect("store chunk");

        Chunk::delete_by_knowledge_id(&db, "knowledge1")
            .await
            .expect("delete chunk");
    }
}
