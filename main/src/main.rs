use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::kv::InMemoryKvCache;
use common::storage::queue::InMemoryQueue;
use common::storage::store::StorageManager;
use common::utils::config::get_config;
use common::utils::contracts::{DocReader, GraphNamespace, GraphRepository, ReaderChunk};
use retrieval_pipeline::SurrealRetrieveEngine;
use task_orchestrator::context::OrchestratorContext;
use task_orchestrator::worker::run_worker_loop;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stand-in `DocReader` for deployments that haven't wired a real document
/// parser in yet. Document ingestion tasks fail fast with a clear error
/// rather than silently no-opping.
struct UnconfiguredDocReader;

#[async_trait]
impl DocReader for UnconfiguredDocReader {
    async fn read_from_file(&self, _mime_type: &str, _bytes: &[u8]) -> Result<Vec<ReaderChunk>, AppError> {
        Err(AppError::FatalExternal("no DocReader backend configured".into()))
    }

    async fn read_from_url(&self, _url: &str) -> Result<Vec<ReaderChunk>, AppError> {
        Err(AppError::FatalExternal("no DocReader backend configured".into()))
    }
}

/// Stand-in `GraphRepository` for deployments without a graph backend; graph
/// rebuild/extract tasks become no-ops instead of failing the worker.
struct NullGraphRepository;

#[async_trait]
impl GraphRepository for NullGraphRepository {
    async fn add_graph(&self, _namespace: GraphNamespace, _graph_data: Vec<serde_json::Value>) -> Result<(), AppError> {
        Ok(())
    }

    async fn del_graph(&self, _namespaces: Vec<GraphNamespace>) -> Result<(), AppError> {
        Ok(())
    }
}

/// Thin process entry point: wires the concrete collaborators (SurrealDB,
/// OpenAI, object storage) into an `OrchestratorContext` and runs the worker
/// loop. No HTTP or CLI surface lives here; this crate exists only to prove
/// the other crates compose.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.apply_migrations_with_dimension(config.default_embedding_dimensions).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let storage = Arc::new(StorageManager::new(&config).await?);

    let retrieve_engine = Arc::new(SurrealRetrieveEngine::new(
        db.clone(),
        openai_client.clone(),
        config.default_embedding_model.clone(),
        config.default_embedding_dimensions,
    ));

    let ctx = Arc::new(OrchestratorContext {
        db: db.clone(),
        queue: Arc::new(InMemoryQueue::new()),
        kv: Arc::new(InMemoryKvCache::new()),
        retrieve_engine,
        embedder: openai_client.clone(),
        chat_model: openai_client,
        doc_reader: Arc::new(UnconfiguredDocReader),
        file_service: storage,
        graph_repository: Arc::new(NullGraphRepository),
        embedding_model: config.default_embedding_model.clone(),
        embedding_dimensions: config.default_embedding_dimensions,
    });

    info!("starting task orchestrator worker loop");
    run_worker_loop(ctx).await
}
