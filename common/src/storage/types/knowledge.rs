use serde::{Deserialize, Serialize};

use crate::stored_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Document,
    Url,
    Faq,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Tombstone: the record is being torn down and must be treated as absent by
    /// every read path even though the row still exists.
    Deleting,
    Draft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    NotStarted,
    Pending,
    Completed,
    Failed,
}

stored_object!(Knowledge, "knowledge", {
    tenant_id: String,
    kb_id: String,
    knowledge_type: KnowledgeType,
    title: String,
    file_hash: Option<String>,
    file_path: Option<String>,
    storage_size: u64,
    parse_status: ParseStatus,
    enable_status: bool,
    embedding_model_id: Option<String>,
    summary_status: SummaryStatus,
    error_message: Option<String>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Knowledge {
    pub fn new(
        tenant_id: String,
        kb_id: String,
        knowledge_type: KnowledgeType,
        title: String,
        file_hash: Option<String>,
        file_path: Option<String>,
        storage_size: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            kb_id,
            knowledge_type,
            title,
            file_hash,
            file_path,
            storage_size,
            parse_status: ParseStatus::Pending,
            enable_status: true,
            embedding_model_id: None,
            summary_status: SummaryStatus::NotStarted,
            error_message: None,
            processed_at: None,
        }
    }

    /// A tombstoned record must never be visible to retrieval or listing paths.
    pub fn is_visible(&self) -> bool {
        self.parse_status != ParseStatus::Deleting
    }

    pub async fn list_by_kb(
        db: &crate::storage::db::SurrealDbClient,
        kb_id: &str,
    ) -> Result<Vec<Knowledge>, crate::error::AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM knowledge WHERE kb_id = $kb_id")
            .bind(("kb_id", kb_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}
