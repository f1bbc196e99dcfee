use std::sync::Arc;
use std::time::Duration;

use common::storage::queue::QueuedTask;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::OrchestratorContext;
use crate::dispatch;

/// Queues polled in priority order: `default` is drained before `low` ever gets
/// a chance, so summary/question generation never starves document processing.
const QUEUES: [&str; 2] = ["default", "low"];

pub async fn run_worker_loop(ctx: Arc<OrchestratorContext>) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("task-worker-{}", Uuid::new_v4());
    let idle_backoff = Duration::from_millis(500);
    let error_backoff = Duration::from_secs(1);

    loop {
        match claim_next(&ctx).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, kind = ?task.kind, attempt = task.retry_count, "claimed task");
                if let Err(err) = dispatch(&ctx, &task).await {
                    error!(%worker_id, %task_id, error = %err, "task failed, requeueing");
                    if let Err(requeue_err) = ctx.queue.requeue(task).await {
                        error!(%worker_id, %task_id, error = %requeue_err, "failed to requeue task");
                    }
                }
            }
            Ok(None) => sleep(idle_backoff).await,
            Err(err) => {
                error!(%worker_id, error = %err, "failed to dequeue task");
                warn!("backing off for 1s after dequeue error");
                sleep(error_backoff).await;
            }
        }
    }
}

async fn claim_next(ctx: &OrchestratorContext) -> Result<Option<QueuedTask>, common::error::AppError> {
    for queue in QUEUES {
        if let Some(task) = ctx.queue.dequeue(queue).await? {
            return Ok(Some(task));
        }
    }
    Ok(None)
}
