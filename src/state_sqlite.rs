//! SQLite-backed [`StateStore`].
//!
//! One row per item in `index_state`. Each operation is a single
//! statement, so concurrent writes to different ids never interfere.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use change_indexer_core::error::{IndexerError, Result};
use change_indexer_core::fingerprint::Fingerprint;
use change_indexer_core::models::{StateEntry, StateSnapshot};
use change_indexer_core::store::StateStore;

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<(String, StateEntry)> {
    let id: String = row.try_get("id").map_err(IndexerError::state)?;
    let fingerprint: String = row.try_get("fingerprint").map_err(IndexerError::state)?;
    let metadata_fingerprint: Option<String> = row
        .try_get("metadata_fingerprint")
        .map_err(IndexerError::state)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(IndexerError::state)?;

    Ok((
        id,
        StateEntry {
            fingerprint: Fingerprint::parse(&fingerprint)?,
            metadata_fingerprint: metadata_fingerprint
                .as_deref()
                .map(Fingerprint::parse)
                .transpose()?,
            updated_at,
        },
    ))
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, id: &str) -> Result<Option<StateEntry>> {
        let row = sqlx::query(
            "SELECT id, fingerprint, metadata_fingerprint, updated_at FROM index_state WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(IndexerError::state)?;

        row.as_ref()
            .map(row_to_entry)
            .transpose()
            .map(|opt| opt.map(|(_, entry)| entry))
    }

    async fn set(&self, id: &str, entry: &StateEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_state (id, fingerprint, metadata_fingerprint, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                metadata_fingerprint = excluded.metadata_fingerprint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(entry.fingerprint.as_str())
        .bind(entry.metadata_fingerprint.as_ref().map(|f| f.as_str()))
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(IndexerError::state)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_state WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(IndexerError::state)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<StateSnapshot> {
        let rows = sqlx::query(
            "SELECT id, fingerprint, metadata_fingerprint, updated_at FROM index_state ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(IndexerError::state)?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use change_indexer_core::fingerprint::fingerprint;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqliteStateStore {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("state.sqlite");
        let pool = db::connect(&config).await.unwrap();
        migrate::create_tables(&pool).await.unwrap();
        SqliteStateStore::new(pool)
    }

    #[tokio::test]
    async fn set_get_delete() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let entry = StateEntry {
            fingerprint: fingerprint("update web"),
            metadata_fingerprint: Some(fingerprint("meta")),
            updated_at: 42,
        };
        store.set("aws_instance.web[0]", &entry).await.unwrap();
        assert_eq!(store.get("aws_instance.web[0]").await.unwrap(), Some(entry.clone()));

        let updated = StateEntry {
            fingerprint: fingerprint("update web v2"),
            metadata_fingerprint: None,
            updated_at: 43,
        };
        store.set("aws_instance.web[0]", &updated).await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["aws_instance.web[0]"], updated);

        store.delete("aws_instance.web[0]").await.unwrap();
        assert!(store.get("aws_instance.web[0]").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_fingerprint_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        sqlx::query("INSERT INTO index_state (id, fingerprint, updated_at) VALUES ('x', 'nothex', 0)")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.list_all().await,
            Err(IndexerError::Fingerprint { .. })
        ));
    }
}
