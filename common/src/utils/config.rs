use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Which retriever backends a tenant has effectively enabled. The concrete backends
/// are external collaborators (see `RetrieveEngine`); this only selects which ones
/// the composite engine should consult.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverEngineKind {
    Vector,
    Keyword,
    Graph,
}

fn default_retriever_engines() -> Vec<RetrieverEngineKind> {
    vec![RetrieverEngineKind::Vector, RetrieverEngineKind::Keyword]
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    // Embedding defaults, overridden per KB / tenant via SystemSettings-style records.
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub default_embedding_dimensions: u32,

    // Multi-tenant quota defaults (bytes). A tenant without an explicit override inherits these.
    #[serde(default = "default_storage_quota_bytes")]
    pub default_storage_quota_bytes: u64,

    #[serde(default = "default_retriever_engines")]
    pub default_retriever_engines: Vec<RetrieverEngineKind>,

    // Reranker pool configuration (fastembed-backed reference `Reranker` implementation).
    #[serde(default)]
    pub reranking_enabled: bool,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,

    // Async task orchestrator tuning.
    #[serde(default = "default_task_retry_base_ms")]
    pub task_retry_base_ms: u64,
    #[serde(default = "default_task_retry_max_attempts")]
    pub task_retry_max_attempts: usize,

    // Agent engine.
    #[serde(default = "default_agent_max_iterations_ceiling")]
    pub agent_max_iterations_ceiling: u32,
    #[serde(default = "default_agent_max_iterations")]
    pub agent_default_max_iterations: u32,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_storage_quota_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_task_retry_base_ms() -> u64 {
    100
}

fn default_task_retry_max_attempts() -> usize {
    3
}

fn default_agent_max_iterations_ceiling() -> u32 {
    30
}

fn default_agent_max_iterations() -> u32 {
    5
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;

    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            openai_api_key: "test".into(),
            surrealdb_address: "test".into(),
            surrealdb_username: "test".into(),
            surrealdb_password: "test".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            data_dir: "/tmp/unused".into(),
            http_port: 0,
            openai_base_url: "..".into(),
            storage: StorageKind::Memory,
            default_embedding_model: default_embedding_model(),
            default_embedding_dimensions: default_embedding_dimensions(),
            default_storage_quota_bytes: default_storage_quota_bytes(),
            default_retriever_engines: default_retriever_engines(),
            reranking_enabled: false,
            reranking_pool_size: None,
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            fastembed_max_length: None,
            task_retry_base_ms: default_task_retry_base_ms(),
            task_retry_max_attempts: default_task_retry_max_attempts(),
            agent_max_iterations_ceiling: default_agent_max_iterations_ceiling(),
            agent_default_max_iterations: default_agent_max_iterations(),
        }
    }
}
