use common::error::{AppError, DuplicateKind};
use common::storage::db::SurrealDbClient;
use common::storage::types::knowledge::Knowledge;
use common::storage::types::StoredObject;

/// MD5 fingerprint of file bytes, used for the file-dedup checkpoint.
pub fn fingerprint_file(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// MD5 fingerprint of a canonical URL string, used for the URL-dedup checkpoint.
pub fn fingerprint_url(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Looks for a prior `Knowledge` in the same `(tenant, kb)` with a matching
/// fingerprint (and, for files, matching size). If found, refreshes its
/// `created_at` and returns a typed `Duplicate` error carrying its id.
pub async fn check_duplicate(
    db: &SurrealDbClient,
    tenant_id: &str,
    kb_id: &str,
    file_hash: &str,
    storage_size: Option<u64>,
    kind: DuplicateKind,
) -> Result<(), AppError> {
    let sql = "SELECT * FROM knowledge WHERE tenant_id = $tenant_id AND kb_id = $kb_id AND file_hash = $file_hash LIMIT 1";
    let mut response = db
        .client
        .query(sql)
        .bind(("tenant_id", tenant_id.to_string()))
        .bind(("kb_id", kb_id.to_string()))
        .bind(("file_hash", file_hash.to_string()))
        .await?;
    let existing: Vec<Knowledge> = response.take(0)?;

    let Some(found) = existing.into_iter().find(|k| {
        storage_size.is_none_or(|size| k.storage_size == size)
    }) else {
        return Ok(());
    };

    let refresh_sql = "UPDATE type::thing('knowledge', $id) SET created_at = time::now()";
    db.client
        .query(refresh_sql)
        .bind(("id", found.get_id().to_string()))
        .await?;

    Err(AppError::Duplicate {
        kind,
        existing_id: found.get_id().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_deterministic() {
        assert_eq!(fingerprint_file(b"abc"), fingerprint_file(b"abc"));
        assert_ne!(fingerprint_file(b"abc"), fingerprint_file(b"abd"));
        assert_eq!(fingerprint_url("https://a"), fingerprint_url("https://a"));
    }

    #[tokio::test]
    async fn no_duplicate_when_table_empty() {
        let db = SurrealDbClient::memory("t", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let result = check_duplicate(
            &db,
            "tenant1",
            "kb1",
            "abc123",
            Some(10),
            DuplicateKind::File,
        )
        .await;
        assert!(result.is_ok());
    }
}
