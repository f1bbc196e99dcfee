use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::storage::types::task::TaskKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub queue: String,
    pub max_retry: u32,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueInfo {
    pub id: String,
    pub queue: String,
}

/// Durable task queue contract. `enqueue` returns immediately once the task is
/// persisted; delivery is at-least-once, so handlers must be idempotent
/// (see `Task::idempotency_key`).
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        queue: &str,
        max_retry: u32,
    ) -> Result<EnqueueInfo, AppError>;

    /// Pops the next task for `queue`, if any, without blocking.
    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedTask>, AppError>;

    /// Requeues a task after a failed attempt, bumping its retry count.
    async fn requeue(&self, task: QueuedTask) -> Result<(), AppError>;
}

/// In-memory reference `Queue`. A durable backend (e.g. a RabbitMQ/lapin-backed
/// implementation) is an external collaborator behind the same trait.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<VecDeque<QueuedTask>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        queue: &str,
        max_retry: u32,
    ) -> Result<EnqueueInfo, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let task = QueuedTask {
            id: id.clone(),
            kind,
            payload,
            queue: queue.to_string(),
            max_retry,
            retry_count: 0,
        };
        self.inner.lock().await.push_back(task);
        Ok(EnqueueInfo {
            id,
            queue: queue.to_string(),
        })
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedTask>, AppError> {
        let mut guard = self.inner.lock().await;
        let position = guard.iter().position(|t| t.queue == queue);
        Ok(position.and_then(|idx| guard.remove(idx)))
    }

    async fn requeue(&self, mut task: QueuedTask) -> Result<(), AppError> {
        task.retry_count += 1;
        self.inner.lock().await.push_back(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_fifo() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue(TaskKind::DocumentProcess, serde_json::json!({}), "default", 3)
            .await
            .unwrap();
        queue
            .enqueue(TaskKind::FaqImport, serde_json::json!({}), "default", 1)
            .await
            .unwrap();

        let first = queue.dequeue("default").await.unwrap().unwrap();
        assert_eq!(first.kind, TaskKind::DocumentProcess);
        let second = queue.dequeue("default").await.unwrap().unwrap();
        assert_eq!(second.kind, TaskKind::FaqImport);
        assert!(queue.dequeue("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_bumps_retry_count() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue(TaskKind::DocumentProcess, serde_json::json!({}), "default", 3)
            .await
            .unwrap();
        let task = queue.dequeue("default").await.unwrap().unwrap();
        queue.requeue(task).await.unwrap();
        let requeued = queue.dequeue("default").await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 1);
    }
}
