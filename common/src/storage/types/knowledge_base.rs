use serde::{Deserialize, Serialize};

use crate::stored_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBaseType {
    Document,
    Faq,
}

/// Whether a FAQ chunk's index entry carries just the question text or the
/// question joined with its answer(s).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaqIndexMode {
    QuestionOnly,
    QuestionAnswer,
}

/// Whether the standard question and its similar questions share one index
/// entry or each gets its own (with its own `source_id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionIndexMode {
    Combined,
    Separate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VlmConfig {
    pub enabled: bool,
    pub model_id: Option<String>,
    pub prompt: Option<String>,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_id: None,
            prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaqConfig {
    pub index_mode: FaqIndexMode,
    pub question_index_mode: QuestionIndexMode,
}

impl Default for FaqConfig {
    fn default() -> Self {
        Self {
            index_mode: FaqIndexMode::QuestionOnly,
            question_index_mode: QuestionIndexMode::Combined,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractConfig {
    pub summary_enabled: bool,
    pub question_generation_enabled: bool,
    pub graph_enabled: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            summary_enabled: true,
            question_generation_enabled: false,
            graph_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbStorageConfig {
    pub storage_quota_bytes: Option<u64>,
}

impl Default for KbStorageConfig {
    fn default() -> Self {
        Self {
            storage_quota_bytes: None,
        }
    }
}

stored_object!(KnowledgeBase, "knowledge_base", {
    tenant_id: String,
    name: String,
    kb_type: KnowledgeBaseType,
    chunking: ChunkingConfig,
    vlm: VlmConfig,
    embedding_model_id: Option<String>,
    summary_model_id: Option<String>,
    faq: FaqConfig,
    extract: ExtractConfig,
    storage: KbStorageConfig
});

impl KnowledgeBase {
    pub fn new(tenant_id: String, name: String, kb_type: KnowledgeBaseType) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            name,
            kb_type,
            chunking: ChunkingConfig::default(),
            vlm: VlmConfig::default(),
            embedding_model_id: None,
            summary_model_id: None,
            faq: FaqConfig::default(),
            extract: ExtractConfig::default(),
            storage: KbStorageConfig::default(),
        }
    }

    /// Resolves effective values, re-applying tenant defaults for any field the
    /// knowledge base leaves unset.
    pub fn effective_embedding_model<'a>(&'a self, tenant_default: &'a str) -> &'a str {
        self.embedding_model_id.as_deref().unwrap_or(tenant_default)
    }

    pub fn effective_storage_quota(&self, tenant_default: u64) -> u64 {
        self.storage.storage_quota_bytes.unwrap_or(tenant_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_kb_falls_back_to_tenant_defaults() {
        let kb = KnowledgeBase::new("tenant1".into(), "kb1".into(), KnowledgeBaseType::Document);
        assert_eq!(kb.effective_embedding_model("text-embedding-3-small"), "text-embedding-3-small");
        assert_eq!(kb.effective_storage_quota(1024), 1024);
    }
}
