//! SQLite-backed [`IndexStore`].
//!
//! Records live in `index_records` with the vector encoded as a
//! little-endian f32 BLOB. The vector dimension is pinned in `index_meta`
//! by `chix init` or by the first write, and every later write must match.

use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use change_indexer_core::embedding::{blob_to_vec, vec_to_blob};
use change_indexer_core::error::{IndexerError, Result};
use change_indexer_core::fingerprint::Fingerprint;
use change_indexer_core::models::{IndexRecord, Metadata};
use change_indexer_core::store::IndexStore;

use crate::migrate::DIMS_KEY;

pub struct SqliteIndex {
    pool: SqlitePool,
    dims: Mutex<Option<usize>>,
}

/// Busy databases and pool exhaustion clear up on their own.
fn classify(e: sqlx::Error) -> IndexerError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => IndexerError::index_transient(e.to_string()),
        sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy") => {
            IndexerError::index_transient(e.to_string())
        }
        _ => IndexerError::index_permanent(e.to_string()),
    }
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dims: Mutex::new(None),
        }
    }

    fn cached_dims(&self) -> Option<usize> {
        self.dims.lock().ok().and_then(|d| *d)
    }

    /// Pin the dimension on first write, then check every write against it.
    async fn ensure_dims(&self, dims: usize) -> Result<()> {
        let pinned = match self.cached_dims() {
            Some(d) => d,
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                    .bind(DIMS_KEY)
                    .bind(dims.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
                let value: String = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                    .bind(DIMS_KEY)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(classify)?;
                let pinned: usize = value.parse().map_err(|_| {
                    IndexerError::index_permanent(format!("corrupt index_meta dims value '{}'", value))
                })?;
                if let Ok(mut guard) = self.dims.lock() {
                    *guard = Some(pinned);
                }
                pinned
            }
        };

        if pinned != dims {
            return Err(IndexerError::index_permanent(format!(
                "index holds {}-dimensional vectors, got {}",
                pinned, dims
            )));
        }
        Ok(())
    }

    /// Fetch a stored record, for `chix state` output and tests.
    pub async fn get(&self, id: &str) -> Result<Option<IndexRecord>> {
        let row = sqlx::query(
            "SELECT id, content, metadata_json, fingerprint, embedding FROM index_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: String = row.try_get("metadata_json").map_err(classify)?;
        let fingerprint: String = row.try_get("fingerprint").map_err(classify)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(classify)?;
        Ok(Some(IndexRecord {
            id: row.try_get("id").map_err(classify)?,
            canonical_text: row.try_get("content").map_err(classify)?,
            metadata: serde_json::from_str(&metadata_json)
                .map_err(|e| IndexerError::index_permanent(e.to_string()))?,
            fingerprint: Fingerprint::parse(&fingerprint)?,
            embedding: blob_to_vec(&blob),
        }))
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM index_records")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<()> {
        self.ensure_dims(record.embedding.len()).await?;

        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| IndexerError::index_permanent(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO index_records (id, content, metadata_json, fingerprint, dims, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                fingerprint = excluded.fingerprint,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.canonical_text)
        .bind(&metadata_json)
        .bind(record.fingerprint.as_str())
        .bind(record.embedding.len() as i64)
        .bind(vec_to_blob(&record.embedding))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        metadata: &Metadata,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| IndexerError::index_permanent(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE index_records SET metadata_json = ?, fingerprint = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&metadata_json)
        .bind(fingerprint.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(IndexerError::index_permanent(format!(
                "no record '{}' to update metadata on; rerun with --full",
                id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use change_indexer_core::fingerprint::fingerprint;
    use tempfile::TempDir;

    async fn index(tmp: &TempDir) -> SqliteIndex {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("index.sqlite");
        let pool = db::connect(&config).await.unwrap();
        migrate::create_tables(&pool).await.unwrap();
        SqliteIndex::new(pool)
    }

    fn record(id: &str, text: &str, dims: usize) -> IndexRecord {
        let mut metadata = Metadata::new();
        metadata.insert("operation".into(), "create".into());
        IndexRecord {
            id: id.to_string(),
            canonical_text: text.to_string(),
            metadata,
            fingerprint: fingerprint(text),
            embedding: vec![0.25; dims],
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        let rec = record("aws_s3_bucket.logs", "create logs", 4);
        index.upsert(&rec).await.unwrap();
        index.upsert(&rec).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.get("aws_s3_bucket.logs").await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn dimension_is_pinned() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.upsert(&record("a", "x", 4)).await.unwrap();
        let err = index.upsert(&record("b", "y", 8)).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("4-dimensional"));
    }

    #[tokio::test]
    async fn metadata_update_requires_existing_record() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.upsert(&record("a", "x", 2)).await.unwrap();

        let mut meta = Metadata::new();
        meta.insert("operation".into(), "replace".into());
        index
            .upsert_metadata("a", &meta, &fingerprint("x"))
            .await
            .unwrap();
        let stored = index.get("a").await.unwrap().unwrap();
        assert_eq!(stored.metadata, meta);
        assert_eq!(stored.embedding, vec![0.25, 0.25]);

        assert!(index
            .upsert_metadata("missing", &meta, &fingerprint("x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.delete("nope").await.unwrap();
        index.upsert(&record("a", "x", 2)).await.unwrap();
        index.delete("a").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
