use common::error::AppError;
use common::storage::types::chunk::{AnswerStrategy, Chunk, ChunkType, FaqChunkMetadata};
use serde::{Deserialize, Serialize};

/// A FAQ chunk reduced to its author-facing fields: everything a CSV row or
/// an import payload entry carries, independent of how it's stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub category: Option<String>,
    pub standard_question: String,
    pub similar_questions: Vec<String>,
    pub negative_questions: Vec<String>,
    pub answers: Vec<String>,
    pub reply_all: bool,
    pub disabled: bool,
    pub forbid_recommendation: bool,
}

/// Bit in `Chunk::flags` marking a FAQ chunk eligible for proactive
/// recommendation. Export's "forbid recommendation" column is its negation.
pub const FLAG_RECOMMENDED: u32 = 1;

impl FaqEntry {
    pub fn content_hash(&self) -> String {
        self.to_metadata()
            .map(|m| m.content_hash())
            .unwrap_or_default()
    }

    pub fn to_metadata(&self) -> Result<FaqChunkMetadata, AppError> {
        let mut metadata = FaqChunkMetadata::new(self.standard_question.clone(), self.answers.clone())?;
        metadata.similar_questions = self.similar_questions.clone();
        metadata.negative_questions = self.negative_questions.clone();
        metadata.answer_strategy = if self.reply_all {
            AnswerStrategy::All
        } else {
            AnswerStrategy::Random
        };
        Ok(metadata)
    }

    pub fn to_chunk(&self, tenant_id: String, knowledge_id: String, kb_id: String, chunk_index: u32) -> Result<Chunk, AppError> {
        let metadata = self.to_metadata()?;
        let mut chunk = Chunk::new(
            tenant_id,
            knowledge_id,
            kb_id,
            chunk_index,
            self.standard_question.clone(),
            ChunkType::Faq,
        );
        chunk.content_hash = Some(metadata.content_hash());
        chunk.is_enabled = !self.disabled;
        chunk.tag_id = self.category.clone();
        chunk.flags = if self.forbid_recommendation { 0 } else { FLAG_RECOMMENDED };
        chunk.faq_metadata = Some(metadata);
        Ok(chunk)
    }

    pub fn from_chunk(chunk: &Chunk) -> Option<Self> {
        let metadata = chunk.faq_metadata.as_ref()?;
        Some(Self {
            category: chunk.tag_id.clone(),
            standard_question: metadata.standard_question.clone(),
            similar_questions: metadata.similar_questions.clone(),
            negative_questions: metadata.negative_questions.clone(),
            answers: metadata.answers.clone(),
            reply_all: matches!(metadata.answer_strategy, AnswerStrategy::All),
            disabled: !chunk.is_enabled,
            forbid_recommendation: chunk.flags & FLAG_RECOMMENDED == 0,
        })
    }
}
