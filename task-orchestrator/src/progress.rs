use std::time::Duration;

use common::error::AppError;
use common::storage::kv::KvCache;
use common::storage::types::task_progress::{faq_import_lock_key, TaskProgress};

/// Reads the KV-backed progress record for `task_id`, if any.
pub async fn load(kv: &dyn KvCache, task_id: &str) -> Result<Option<TaskProgress>, AppError> {
    match kv.get(&TaskProgress::kv_key(task_id)).await? {
        Some(raw) => {
            let progress: TaskProgress = serde_json::from_str(&raw)
                .map_err(|e| AppError::InternalError(format!("corrupt task progress record: {e}")))?;
            Ok(Some(progress))
        }
        None => Ok(None),
    }
}

/// Persists `progress` with the given TTL, replacing any existing record.
pub async fn save(kv: &dyn KvCache, progress: &TaskProgress, ttl: Duration) -> Result<(), AppError> {
    let raw = serde_json::to_string(progress)
        .map_err(|e| AppError::InternalError(format!("failed to serialize task progress: {e}")))?;
    kv.set(&TaskProgress::kv_key(&progress.task_id), raw, Some(ttl)).await
}

/// Acquires the single-task-per-KB FAQ import lock. Returns `false` if another
/// import is already running for this KB.
pub async fn acquire_faq_import_lock(kv: &dyn KvCache, kb_id: &str, ttl: Duration) -> Result<bool, AppError> {
    kv.set_if_absent(&faq_import_lock_key(kb_id), "1".into(), Some(ttl)).await
}

/// Releases the FAQ import lock. Called on every terminal status transition
/// (success or final-retry failure) so the lock never outlives its TTL by much.
pub async fn release_faq_import_lock(kv: &dyn KvCache, kb_id: &str) -> Result<(), AppError> {
    kv.del(&faq_import_lock_key(kb_id)).await
}
