use serde::{Deserialize, Serialize};

use crate::stored_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DocumentProcess,
    FaqImport,
    SummaryGeneration,
    QuestionGeneration,
    GraphRebuild,
    ChunkExtract,
    KbClone,
}

/// Retry ceiling shared by the kinds whose table entry just says "default".
const DEFAULT_MAX_RETRY: u32 = 3;

impl TaskKind {
    /// Maximum retry attempts per the orchestrator's per-kind retry table.
    pub fn max_retry(&self) -> u32 {
        match self {
            TaskKind::DocumentProcess => DEFAULT_MAX_RETRY,
            TaskKind::FaqImport => 5,
            TaskKind::SummaryGeneration => 3,
            TaskKind::QuestionGeneration => 3,
            TaskKind::GraphRebuild => DEFAULT_MAX_RETRY,
            TaskKind::ChunkExtract => 3,
            TaskKind::KbClone => DEFAULT_MAX_RETRY,
        }
    }

    /// The queue a task of this kind is dispatched on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            TaskKind::SummaryGeneration | TaskKind::QuestionGeneration => "low",
            _ => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    Created,
    InProgress { attempts: u32, last_attempt: chrono::DateTime<chrono::Utc> },
    Completed,
    Error(String),
    Cancelled,
}

stored_object!(Task, "task", {
    kind: TaskKind,
    payload: serde_json::Value,
    status: TaskStatus,
    idempotency_key: String,
    queue: String
});

impl Task {
    pub fn new(kind: TaskKind, payload: serde_json::Value, idempotency_key: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            kind,
            payload,
            status: TaskStatus::Created,
            idempotency_key,
            queue: "default".into(),
        }
    }

    pub fn attempts(&self) -> u32 {
        match &self.status {
            TaskStatus::InProgress { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn should_retry(&self) -> bool {
        self.attempts() < self.kind.max_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_clone_uses_the_default_retry_ceiling() {
        let mut task = Task::new(TaskKind::KbClone, serde_json::json!({}), "k1".into());
        assert!(task.should_retry());
        task.status = TaskStatus::InProgress {
            attempts: DEFAULT_MAX_RETRY,
            last_attempt: chrono::Utc::now(),
        };
        assert!(!task.should_retry());
    }

    #[test]
    fn document_process_retries_up_to_three_times() {
        let mut task = Task::new(TaskKind::DocumentProcess, serde_json::json!({}), "k2".into());
        task.status = TaskStatus::InProgress {
            attempts: 2,
            last_attempt: chrono::Utc::now(),
        };
        assert!(task.should_retry());
        task.status = TaskStatus::InProgress {
            attempts: 3,
            last_attempt: chrono::Utc::now(),
        };
        assert!(!task.should_retry());
    }
}
