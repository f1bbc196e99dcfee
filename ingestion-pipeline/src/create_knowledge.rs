use common::error::{AppError, DuplicateKind};
use common::storage::db::SurrealDbClient;
use common::storage::queue::Queue;
use common::storage::types::knowledge::{Knowledge, KnowledgeType};
use common::storage::types::knowledge_base::KnowledgeBase;
use common::storage::types::task::TaskKind;
use common::storage::types::tenant::Tenant;
use common::storage::types::StoredObject;
use common::utils::contracts::FileService;
use tracing::warn;

use crate::dedup::{check_duplicate, fingerprint_file, fingerprint_url};

/// Resolves the quota a new Knowledge of `additional_bytes` must be checked
/// against: the KB's own quota if it overrides the tenant's.
fn resolve_quota(tenant: &Tenant, kb: &KnowledgeBase) -> u64 {
    kb.effective_storage_quota(tenant.storage_quota_bytes)
}

/// Insert-time quota gate (checkpoint (a)): refuses only once the tenant is
/// already at or over quota, independent of the incoming file's size. The
/// additive "would this upload push us over" check is checkpoint (b), applied
/// against the real indexed size in `process_chunks::process_chunks` via
/// `Tenant::would_exceed_quota`.
async fn check_quota(db: &SurrealDbClient, tenant_id: &str, kb: &KnowledgeBase) -> Result<(), AppError> {
    let tenant: Tenant = db
        .get_item(tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("tenant {tenant_id} not found")))?;
    let quota = resolve_quota(&tenant, kb);
    if tenant.storage_used_bytes >= quota {
        return Err(AppError::QuotaExceeded(format!("tenant {tenant_id} is already at or over its storage quota")));
    }
    Ok(())
}

/// Inserts the pending Knowledge row and enqueues its `DocumentProcess` task.
/// A failure to enqueue does not roll back the insert: the Knowledge simply
/// stays `pending` until an operator or a reconciliation sweep retries it.
async fn insert_and_enqueue(
    db: &SurrealDbClient,
    queue: &dyn Queue,
    knowledge: Knowledge,
) -> Result<Knowledge, AppError> {
    db.store_item(knowledge.clone()).await?;

    let payload = serde_json::json!({ "knowledge_id": knowledge.id });
    if let Err(err) = queue
        .enqueue(TaskKind::DocumentProcess, payload, TaskKind::DocumentProcess.queue_name(), TaskKind::DocumentProcess.max_retry())
        .await
    {
        warn!(knowledge_id = %knowledge.id, error = %err, "failed to enqueue DocumentProcess task");
    }

    Ok(knowledge)
}

/// Creates a Knowledge from an uploaded file's bytes. Caller is responsible
/// for having already persisted the bytes to `file_path` via `FileService`.
pub async fn create_knowledge_from_file(
    db: &SurrealDbClient,
    queue: &dyn Queue,
    file_service: &dyn FileService,
    tenant_id: &str,
    kb: &KnowledgeBase,
    title: String,
    bytes: Vec<u8>,
    file_path: String,
) -> Result<Knowledge, AppError> {
    let storage_size = bytes.len() as u64;
    let file_hash = fingerprint_file(&bytes);

    check_duplicate(db, tenant_id, &kb.id, &file_hash, Some(storage_size), DuplicateKind::File).await?;
    check_quota(db, tenant_id, kb).await?;

    file_service.put(&file_path, bytes).await?;

    let knowledge = Knowledge::new(
        tenant_id.to_string(),
        kb.id.clone(),
        KnowledgeType::Document,
        title,
        Some(file_hash),
        Some(file_path),
        storage_size,
    );
    insert_and_enqueue(db, queue, knowledge).await
}

/// Creates a Knowledge from a URL to be fetched by the external `DocReader`
/// during document processing.
pub async fn create_knowledge_from_url(
    db: &SurrealDbClient,
    queue: &dyn Queue,
    tenant_id: &str,
    kb: &KnowledgeBase,
    title: String,
    url: String,
) -> Result<Knowledge, AppError> {
    let url_hash = fingerprint_url(&url);
    check_duplicate(db, tenant_id, &kb.id, &url_hash, None, DuplicateKind::Url).await?;

    let knowledge = Knowledge::new(
        tenant_id.to_string(),
        kb.id.clone(),
        KnowledgeType::Url,
        title,
        Some(url_hash),
        Some(url),
        0,
    );
    insert_and_enqueue(db, queue, knowledge).await
}

/// Creates a Knowledge from a raw text passage. No file dedup applies; the
/// passage is immediately processable so `file_path` carries the text itself.
pub async fn create_knowledge_from_passage(
    db: &SurrealDbClient,
    queue: &dyn Queue,
    tenant_id: &str,
    kb: &KnowledgeBase,
    title: String,
    passage: String,
) -> Result<Knowledge, AppError> {
    if passage.trim().is_empty() {
        return Err(AppError::Validation("passage text must not be empty".into()));
    }

    let storage_size = passage.len() as u64;
    check_quota(db, tenant_id, kb).await?;

    let knowledge = Knowledge::new(
        tenant_id.to_string(),
        kb.id.clone(),
        KnowledgeType::Document,
        title,
        None,
        Some(passage),
        storage_size,
    );
    insert_and_enqueue(db, queue, knowledge).await
}

/// Creates a draft Knowledge for hand-authored Markdown, left `draft` until
/// the caller explicitly submits it for processing.
pub async fn create_knowledge_manual(
    db: &SurrealDbClient,
    tenant_id: &str,
    kb: &KnowledgeBase,
    title: String,
    markdown: String,
) -> Result<Knowledge, AppError> {
    let storage_size = markdown.len() as u64;
    let mut knowledge = Knowledge::new(
        tenant_id.to_string(),
        kb.id.clone(),
        KnowledgeType::Document,
        title,
        None,
        Some(markdown),
        storage_size,
    );
    knowledge.parse_status = common::storage::types::knowledge::ParseStatus::Draft;
    db.store_item(knowledge.clone()).await?;
    Ok(knowledge)
}

/// Creates the single FAQ-container Knowledge a FAQ knowledge base's imports
/// attach their chunks to. Left `processing`; the FAQ import task consumer
/// is responsible for flipping it to `completed`/`failed`.
pub async fn create_knowledge_faq_container(
    db: &SurrealDbClient,
    tenant_id: &str,
    kb: &KnowledgeBase,
    title: String,
) -> Result<Knowledge, AppError> {
    let mut knowledge = Knowledge::new(tenant_id.to_string(), kb.id.clone(), KnowledgeType::Faq, title, None, None, 0);
    knowledge.parse_status = common::storage::types::knowledge::ParseStatus::Processing;
    db.store_item(knowledge.clone()).await?;
    Ok(knowledge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::queue::InMemoryQueue;
    use common::storage::types::knowledge_base::KnowledgeBaseType;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFileService {
        puts: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl FileService for RecordingFileService {
        async fn put(&self, location: &str, bytes: Vec<u8>) -> Result<(), AppError> {
            self.puts.lock().unwrap().push((location.to_string(), bytes.len()));
            Ok(())
        }
        async fn get(&self, _location: &str) -> Result<Vec<u8>, AppError> {
            Ok(vec![])
        }
        async fn delete(&self, _location: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    async fn setup() -> (SurrealDbClient, Tenant, KnowledgeBase) {
        let db = SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let tenant = Tenant::new(
            "acme".into(),
            1_000_000,
            vec![],
            "text-embedding-3-small".into(),
            "gpt-4o-mini".into(),
        );
        db.store_item(tenant.clone()).await.unwrap();

        let kb = KnowledgeBase::new(tenant.id.clone(), "kb1".into(), KnowledgeBaseType::Document);
        db.store_item(kb.clone()).await.unwrap();

        (db, tenant, kb)
    }

    #[tokio::test]
    async fn file_upload_persists_bytes_and_enqueues() {
        let (db, tenant, kb) = setup().await;
        let queue = InMemoryQueue::default();
        let file_service = RecordingFileService::default();

        let knowledge = create_knowledge_from_file(
            &db,
            &queue,
            &file_service,
            &tenant.id,
            &kb,
            "doc.txt".into(),
            b"hello world".to_vec(),
            "uploads/doc.txt".into(),
        )
        .await
        .expect("create should succeed");

        assert_eq!(knowledge.storage_size, 11);
        assert_eq!(file_service.puts.lock().unwrap().len(), 1);

        let queued = queue.dequeue("default").await.unwrap();
        assert!(queued.is_some());
    }

    #[tokio::test]
    async fn duplicate_file_upload_is_rejected() {
        let (db, tenant, kb) = setup().await;
        let queue = InMemoryQueue::default();
        let file_service = RecordingFileService::default();

        create_knowledge_from_file(
            &db,
            &queue,
            &file_service,
            &tenant.id,
            &kb,
            "doc.txt".into(),
            b"hello world".to_vec(),
            "uploads/doc.txt".into(),
        )
        .await
        .unwrap();

        let result = create_knowledge_from_file(
            &db,
            &queue,
            &file_service,
            &tenant.id,
            &kb,
            "doc.txt".into(),
            b"hello world".to_vec(),
            "uploads/doc2.txt".into(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Duplicate { kind: DuplicateKind::File, .. })));
    }

    #[tokio::test]
    async fn passage_creation_rejects_empty_text() {
        let (db, tenant, kb) = setup().await;
        let queue = InMemoryQueue::default();

        let result = create_knowledge_from_passage(&db, &queue, &tenant.id, &kb, "note".into(), "   ".into()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_creation_starts_in_draft() {
        let (db, tenant, kb) = setup().await;
        let knowledge = create_knowledge_manual(&db, &tenant.id, &kb, "page".into(), "# Title".into())
            .await
            .unwrap();
        assert_eq!(
            knowledge.parse_status,
            common::storage::types::knowledge::ParseStatus::Draft
        );
    }
}
