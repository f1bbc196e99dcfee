use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::types::message::Message;

/// A single retrieval hit, regardless of which backend produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedHit {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Vector,
    Keywords,
    ParentChunk,
    NearByChunk,
    RelationChunk,
}

/// Which single backend a `retrieve` call should be dispatched to. The
/// composite `RetrieveEngine` fans out to these; the hybrid retrieval layer
/// issues one call per backend and fuses the results itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverBackend {
    Vector,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveParams {
    pub kb_id: String,
    pub backend: RetrieverBackend,
    pub query_text: String,
    pub top_k: usize,
    pub knowledge_type: Option<String>,
    pub knowledge_ids: Option<Vec<String>>,
}

/// An indexable unit handed to `batch_index`; mirrors `IndexInfo` plus the
/// embedding vector the engine should store alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBatchEntry {
    pub source_id: String,
    pub chunk_id: String,
    pub knowledge_id: String,
    pub kb_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A single vector/keyword/graph retriever, or the composite that fans out
/// across whichever of these a tenant has enabled. Backends are registered
/// per-tenant; core only depends on this contract (§6).
#[async_trait]
pub trait RetrieveEngine: Send + Sync {
    async fn retrieve(&self, params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError>;

    async fn batch_index(&self, entries: Vec<IndexBatchEntry>) -> Result<(), AppError>;

    async fn delete_by_knowledge_id_list(&self, knowledge_ids: &[String]) -> Result<(), AppError>;

    async fn delete_by_chunk_id_list(&self, chunk_ids: &[String]) -> Result<(), AppError>;

    async fn delete_by_source_id_list(&self, source_ids: &[String]) -> Result<(), AppError>;

    /// Rough estimated storage cost (bytes) of indexing `entries`, used for
    /// the quota checkpoint before committing the indexing step.
    fn estimate_storage_size(&self, entries: &[IndexBatchEntry]) -> u64;

    async fn copy_indices(
        &self,
        src_kb: &str,
        dst_kb: &str,
        knowledge_map: &std::collections::HashMap<String, String>,
        chunk_map: &std::collections::HashMap<String, String>,
    ) -> Result<(), AppError>;

    async fn batch_update_chunk_enabled_status(
        &self,
        updates: &std::collections::HashMap<String, bool>,
    ) -> Result<(), AppError>;

    fn supports_retriever(&self, kind: &str) -> bool;
}

/// Turns text into a fixed-size embedding vector for a given model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &str, model: &str, dimensions: u32) -> Result<Vec<f32>, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub delta: String,
    pub finished: bool,
}

/// The chat/completion LLM collaborator. `complete` returns the full text;
/// `stream` yields incremental chunks for the RAG chat pipeline's SSE path.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, AppError>;

    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<ChatCompletionChunk, AppError>>, AppError>;
}

/// Re-scores a set of candidate passages against a query. Used to sharpen
/// hybrid-retrieval results before they're truncated to `top_k`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
    ) -> Result<Vec<f32>, AppError>;
}

/// An image embedded in reader-produced content. OCR text and caption are
/// produced by an external VLM/OCR backend; either may be absent. `url` is
/// where the reader persisted the extracted image; `original_url` is where it
/// pointed to in the source document, when that differs (e.g. a remote URL
/// inlined into a PDF).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderImage {
    pub url: String,
    pub original_url: Option<String>,
    pub start: usize,
    pub end: usize,
    pub ocr_text: Option<String>,
    pub caption: Option<String>,
}

/// One content unit produced by a `DocReader`, before it becomes a `Chunk`.
/// `start`/`end` are byte offsets into the reader's full extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderChunk {
    pub seq: u32,
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub images: Vec<ReaderImage>,
}

impl ReaderChunk {
    pub fn new(seq: u32, content: String, start: usize, end: usize) -> Self {
        Self {
            seq,
            content,
            start,
            end,
            images: Vec::new(),
        }
    }
}

/// Extracts structured, already-chunked content from an uploaded file or a
/// fetched URL. Concrete backends (PDF parsing, headless-browser page
/// rendering, OCR) are external collaborators; only the contract lives in
/// core.
#[async_trait]
pub trait DocReader: Send + Sync {
    async fn read_from_file(&self, mime_type: &str, bytes: &[u8]) -> Result<Vec<ReaderChunk>, AppError>;
    async fn read_from_url(&self, url: &str) -> Result<Vec<ReaderChunk>, AppError>;
}

/// Durable blob storage for uploaded source files (wraps `StorageManager` in
/// the common case, but stays a trait so callers can mock it).
#[async_trait]
pub trait FileService: Send + Sync {
    async fn put(&self, location: &str, bytes: Vec<u8>) -> Result<(), AppError>;
    async fn get(&self, location: &str) -> Result<Vec<u8>, AppError>;
    async fn delete(&self, location: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNamespace {
    pub kb_id: String,
    pub k: u32,
}

/// Opaque graph-store collaborator. Core never inspects entity/relationship
/// schema — it only adds and removes whole namespaces of graph data.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn add_graph(
        &self,
        namespace: GraphNamespace,
        graph_data: Vec<serde_json::Value>,
    ) -> Result<(), AppError>;

    async fn del_graph(&self, namespaces: Vec<GraphNamespace>) -> Result<(), AppError>;
}
