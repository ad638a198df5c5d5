use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Key in `index_meta` recording the vector dimension of `index_records`.
pub const DIMS_KEY: &str = "dims";

/// Create the SQLite schema used by the sqlite state and index backends.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_tables(&pool).await?;

    if config.index.backend == "sqlite" {
        if let Some(dims) = config.embedding.dims {
            record_dims(&pool, dims).await?;
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // Per-item fingerprints from the last successful apply
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_state (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            metadata_fingerprint TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Local vector index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            fingerprint TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_state_updated_at ON index_state(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the index dimension, or check it against the recorded one.
///
/// The dimension is fixed when the index is created and never changes.
pub async fn record_dims(pool: &SqlitePool, dims: usize) -> Result<()> {
    let existing: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(DIMS_KEY)
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(value) if value == dims.to_string() => Ok(()),
        Some(value) => bail!(
            "index was created with dims = {}, config has {}; run against a new database to change it",
            value,
            dims
        ),
        None => {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(DIMS_KEY)
                .bind(dims.to_string())
                .execute(pool)
                .await?;
            Ok(())
        }
    }
}
