use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::storage::types::file_info::FileError;

/// Kinds of "this already exists" conflicts the ingestion and FAQ paths can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    File,
    Url,
    FaqQuestion,
}

impl std::fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DuplicateKind::File => "file",
            DuplicateKind::Url => "url",
            DuplicateKind::FaqQuestion => "faq_question",
        };
        f.write_str(label)
    }
}

/// The core error taxonomy (see the error handling design: validation, not-found,
/// forbidden, duplicate, quota-exceeded, transient external, fatal external,
/// search-empty, plus the infrastructure errors everything else funnels through).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Duplicate {kind}: {existing_id}")]
    Duplicate {
        kind: DuplicateKind,
        existing_id: String,
    },
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Retryable failure from an external collaborator (DB, queue, KV cache, LLM
    /// provider, embedder, reranker, doc reader, file storage, retrieve engine).
    #[error("Transient external error: {0}")]
    TransientExternal(String),
    /// Non-retryable failure from an external collaborator (e.g. unsupported file type).
    #[error("Fatal external error: {0}")]
    FatalExternal(String),
    /// Sentinel used to drive chat-pipeline fallback; never surfaced as an error upstream.
    #[error("search returned nothing")]
    SearchEmpty,
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Graph mapper error: {0}")]
    GraphMapper(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the queue should retry the task that produced this error.
    ///
    /// Quota-exceeded is deliberately *not* retryable: §7 has the task return success
    /// (no retry) after marking the Knowledge failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientExternal(_) | AppError::Database(_))
    }
}
