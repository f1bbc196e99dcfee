pub mod context;
pub mod handlers;
pub mod progress;
pub mod worker;

use common::error::AppError;
use common::storage::queue::QueuedTask;
use common::storage::types::task::TaskKind;

use crate::context::OrchestratorContext;

/// Dispatches a dequeued task to its handler by `TaskKind`.
pub async fn dispatch(ctx: &OrchestratorContext, task: &QueuedTask) -> Result<(), AppError> {
    match task.kind {
        TaskKind::DocumentProcess => handlers::document_process::handle(ctx, task).await,
        TaskKind::FaqImport => handlers::faq_import::handle(ctx, task).await,
        TaskKind::SummaryGeneration => handlers::summary_generation::handle(ctx, task).await,
        TaskKind::QuestionGeneration => handlers::question_generation::handle(ctx, task).await,
        TaskKind::GraphRebuild => handlers::graph_rebuild::handle(ctx, task).await,
        TaskKind::ChunkExtract => handlers::chunk_extract::handle(ctx, task).await,
        TaskKind::KbClone => handlers::kb_clone::handle(ctx, task).await,
    }
}
