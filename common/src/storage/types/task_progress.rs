use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// KV-backed progress record, not a `stored_object!` — it lives in the `KvCache`
/// under `task_progress:{task_id}` with a TTL (3h for FAQ import, 24h for KB clone)
/// rather than as a SurrealDB row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskProgressStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProgress {
    pub task_id: String,
    pub kb_id: String,
    pub status: TaskProgressStatus,
    pub progress_percent: f32,
    pub total: u64,
    pub processed: u64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(task_id: String, kb_id: String, total: u64) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            kb_id,
            status: TaskProgressStatus::Pending,
            progress_percent: 0.0,
            total,
            processed: 0,
            message: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kv_key(task_id: &str) -> String {
        format!("task_progress:{task_id}")
    }

    pub fn advance(&mut self, processed: u64, message: Option<String>) {
        self.processed = processed;
        self.progress_percent = if self.total == 0 {
            100.0
        } else {
            (processed as f32 / self.total as f32) * 100.0
        };
        self.message = message;
        self.status = TaskProgressStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = TaskProgressStatus::Completed;
        self.progress_percent = 100.0;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskProgressStatus::Failed;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}

/// TTL, in seconds, for progress records of each kind of long-running task.
pub const FAQ_IMPORT_PROGRESS_TTL_SECS: u64 = 3 * 60 * 60;
pub const KB_CLONE_PROGRESS_TTL_SECS: u64 = 24 * 60 * 60;

pub fn faq_import_lock_key(kb_id: &str) -> String {
    format!("faq_import_running:{kb_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_computes_percentage() {
        let mut progress = TaskProgress::new("t1".into(), "kb1".into(), 200);
        progress.advance(50, Some("halfway".into()));
        assert_eq!(progress.progress_percent, 25.0);
        assert_eq!(progress.status, TaskProgressStatus::Processing);
    }

    #[test]
    fn zero_total_completes_immediately() {
        let mut progress = TaskProgress::new("t1".into(), "kb1".into(), 0);
        progress.advance(0, None);
        assert_eq!(progress.progress_percent, 100.0);
    }
}
