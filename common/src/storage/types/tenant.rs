use crate::stored_object;
use crate::storage::types::knowledge_base::ChunkingConfig;
use crate::utils::config::RetrieverEngineKind;

stored_object!(Tenant, "tenant", {
    name: String,
    storage_quota_bytes: u64,
    storage_used_bytes: u64,
    default_retriever_engines: Vec<RetrieverEngineKind>,
    default_chunking: ChunkingConfig,
    default_embedding_model_id: String,
    default_chat_model_id: String,
    agent_default_max_iterations: u32,
    is_active: bool
});

impl Tenant {
    pub fn new(
        name: String,
        storage_quota_bytes: u64,
        default_retriever_engines: Vec<RetrieverEngineKind>,
        default_embedding_model_id: String,
        default_chat_model_id: String,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            storage_quota_bytes,
            storage_used_bytes: 0,
            default_retriever_engines,
            default_chunking: ChunkingConfig::default(),
            default_embedding_model_id,
            default_chat_model_id,
            agent_default_max_iterations: 5,
            is_active: true,
        }
    }

    /// Remaining storage budget; saturates at zero rather than underflowing.
    pub fn remaining_quota(&self) -> u64 {
        self.storage_quota_bytes
            .saturating_sub(self.storage_used_bytes)
    }

    pub fn would_exceed_quota(&self, additional_bytes: u64) -> bool {
        self.storage_used_bytes.saturating_add(additional_bytes) > self.storage_quota_bytes
    }

    /// Atomic add/subtract against the persisted `storage_used_bytes`, so
    /// concurrent ingestions never race through a read-modify-write.
    pub async fn adjust_storage_used(
        db: &crate::storage::db::SurrealDbClient,
        tenant_id: &str,
        delta: i64,
    ) -> Result<(), crate::error::AppError> {
        db.client
            .query("UPDATE type::thing('tenant', $id) SET storage_used_bytes += $delta")
            .bind(("id", tenant_id.to_string()))
            .bind(("delta", delta))
            .await?;
        Ok(())
    }
}
