use crate::error::AppError;

use super::types::StoredObject;
use futures::Stream;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}
pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Idempotent schema setup: tables, keyword/vector indexes. Safe to call on
    /// every startup (replaces the external `surrealdb-migrations` crate with a
    /// lightweight in-process equivalent).
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        self.apply_migrations_with_dimension(1536).await
    }

    pub async fn apply_migrations_with_dimension(&self, dimension: u32) -> Result<(), AppError> {
        self.client
            .query("DEFINE TABLE IF NOT EXISTS tenant SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS knowledge_base SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS knowledge SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS chunk SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS chunk_embedding SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS source_index SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS task SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS session SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS message SCHEMALESS;")
            .query("DEFINE TABLE IF NOT EXISTS file SCHEMALESS;")
            .await?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_kb ON chunk FIELDS kb_id;")
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_knowledge ON chunk FIELDS knowledge_id;")
            .query("DEFINE INDEX IF NOT EXISTS idx_knowledge_kb ON knowledge FIELDS kb_id;")
            .query("DEFINE INDEX IF NOT EXISTS idx_knowledge_hash ON knowledge FIELDS tenant_id, kb_id, file_hash;")
            .query("DEFINE INDEX IF NOT EXISTS idx_task_status ON task FIELDS status;")
            .query("DEFINE INDEX IF NOT EXISTS idx_task_idempotency ON task FIELDS idempotency_key UNIQUE;")
            .query("DEFINE INDEX IF NOT EXISTS idx_source_index_kb ON source_index FIELDS kb_id;")
            .query("DEFINE INDEX IF NOT EXISTS idx_source_index_knowledge ON source_index FIELDS knowledge_id;")
            .query("DEFINE INDEX IF NOT EXISTS idx_source_index_chunk ON source_index FIELDS chunk_id;")
            .await?;

        let fts_query = "DEFINE ANALYZER IF NOT EXISTS content_analyzer TOKENIZERS class FILTERS lowercase, snowball(english);
            DEFINE INDEX IF NOT EXISTS idx_chunk_content_fts ON chunk FIELDS content SEARCH ANALYZER content_analyzer BM25 HIGHLIGHTS;
            DEFINE INDEX IF NOT EXISTS idx_source_index_content_fts ON source_index FIELDS content SEARCH ANALYZER content_analyzer BM25 HIGHLIGHTS;";
        self.client.query(fts_query).await?;

        let hnsw_query = format!(
            "DEFINE INDEX IF NOT EXISTS idx_chunk_embedding ON chunk_embedding FIELDS embedding HNSW DIMENSION {dimension};
             DEFINE INDEX IF NOT EXISTS idx_source_index_embedding ON source_index FIELDS embedding HNSW DIMENSION {dimension};"
        );
        self.client.query(hnsw_query).await?;

        Ok(())
    }

    pub async fn rebuild_indexes(&self) -> Result<(), Error> {
        self.client
            .query("REBUILD INDEX IF EXISTS idx_chunk_embedding ON chunk_embedding")
            .await?;
        self.client
            .query("REBUILD INDEX IF EXISTS idx_chunk_content_fts ON chunk")
            .await?;
        self.client
            .query("REBUILD INDEX IF EXISTS idx_source_index_embedding ON source_index")
            .await?;
        self.client
            .query("REBUILD INDEX IF EXISTS idx_source_index_content_fts ON source_index")
            .await?;
        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.apply_migrations()
            .await
            .expect("Failed to initialize schema");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_apply_migrations_is_idempotent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.apply_migrations().await.expect("first pass");
        db.apply_migrations().await.expect("second pass");
    }
}
