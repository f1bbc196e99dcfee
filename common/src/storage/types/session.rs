use serde::{Deserialize, Serialize};

use crate::stored_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    StaticResponse,
    PromptOnly,
    Abstain,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextCompressionStrategy {
    SlidingWindow,
    Smart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalThresholds {
    pub vector_score_min: f32,
    pub keyword_score_min: f32,
    pub top_k: usize,
    pub rerank_enabled: bool,
    pub rerank_top_k: usize,
    /// Minimum rerank score a candidate must clear to survive `chunk_rerank`,
    /// applied before the `rerank_top_k` count truncation. `None` skips the
    /// score filter entirely.
    pub rerank_threshold: Option<f32>,
}

impl Default for RetrievalThresholds {
    fn default() -> Self {
        Self {
            vector_score_min: 0.0,
            keyword_score_min: 0.0,
            top_k: 10,
            rerank_enabled: false,
            rerank_top_k: 5,
            rerank_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSessionConfig {
    pub enabled: bool,
    pub max_iterations: u32,
    pub allowed_tools: Option<Vec<String>>,
    pub allowed_kb_ids: Vec<String>,
    pub allowed_knowledge_ids: Vec<String>,
    pub web_search_enabled: bool,
    pub reflection_enabled: bool,
}

impl Default for AgentSessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: 5,
            allowed_tools: None,
            allowed_kb_ids: Vec::new(),
            allowed_knowledge_ids: Vec::new(),
            web_search_enabled: false,
            reflection_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextManagerConfig {
    pub strategy: ContextCompressionStrategy,
    pub max_tokens: usize,
    pub recent_message_count: usize,
    pub summarize_threshold: usize,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            strategy: ContextCompressionStrategy::SlidingWindow,
            max_tokens: 8_000,
            recent_message_count: 10,
            summarize_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewriteConfig {
    pub enabled: bool,
    pub prompt_system: String,
    pub prompt_user: String,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt_system: "Rewrite the user's latest question into a standalone search query given the conversation history.".into(),
            prompt_user: "History:\n{{history}}\n\nQuestion: {{query}}".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryExpansionConfig {
    pub enabled: bool,
    pub variant_count: usize,
}

impl Default for QueryExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            variant_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryPromptConfig {
    pub context_template: String,
    pub system_prompt: String,
    pub temperature: f32,
}

impl Default for SummaryPromptConfig {
    fn default() -> Self {
        Self {
            context_template: "Answer the question using only the references below.\n\nReferences:\n{{references}}\n\nQuestion: {{query}}".into(),
            system_prompt: "You are a helpful assistant answering questions from a knowledge base.".into(),
            temperature: 0.2,
        }
    }
}

stored_object!(Session, "session", {
    tenant_id: String,
    kb_id: String,
    max_rounds: u32,
    retrieval: RetrievalThresholds,
    fallback_strategy: FallbackStrategy,
    fallback_response: Option<String>,
    fallback_prompt: Option<String>,
    summary_enabled: bool,
    rewrite: RewriteConfig,
    query_expansion: QueryExpansionConfig,
    summary_prompt: SummaryPromptConfig,
    chat_model_id: String,
    agent: AgentSessionConfig,
    context: ContextManagerConfig
});

impl Session {
    pub fn new(tenant_id: String, kb_id: String, chat_model_id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            kb_id,
            max_rounds: 5,
            retrieval: RetrievalThresholds::default(),
            fallback_strategy: FallbackStrategy::StaticResponse,
            fallback_response: Some("I don't have enough information to answer that.".into()),
            fallback_prompt: None,
            summary_enabled: true,
            rewrite: RewriteConfig::default(),
            query_expansion: QueryExpansionConfig::default(),
            summary_prompt: SummaryPromptConfig::default(),
            chat_model_id,
            agent: AgentSessionConfig::default(),
            context: ContextManagerConfig::default(),
        }
    }
}
