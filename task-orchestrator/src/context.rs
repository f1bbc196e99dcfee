use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use common::storage::kv::KvCache;
use common::storage::queue::Queue;
use common::utils::contracts::{ChatModel, DocReader, Embedder, FileService, GraphRepository, RetrieveEngine};

/// Dependency bundle every task handler is invoked with. Mirrors the pipeline
/// services pattern: one struct of collaborator trait objects the worker loop
/// constructs once and hands to every consumer.
pub struct OrchestratorContext {
    pub db: Arc<SurrealDbClient>,
    pub queue: Arc<dyn Queue>,
    pub kv: Arc<dyn KvCache>,
    pub retrieve_engine: Arc<dyn RetrieveEngine>,
    pub embedder: Arc<dyn Embedder>,
    pub chat_model: Arc<dyn ChatModel>,
    pub doc_reader: Arc<dyn DocReader>,
    pub file_service: Arc<dyn FileService>,
    pub graph_repository: Arc<dyn GraphRepository>,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
}
