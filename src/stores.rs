//! Backend selection for the state and index stores.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use change_indexer_core::store::{IndexStore, StateStore};

use crate::config::Config;
use crate::db;
use crate::index_azure::AzureSearchIndex;
use crate::index_sqlite::SqliteIndex;
use crate::migrate;
use crate::state_json::JsonFileStateStore;
use crate::state_sqlite::SqliteStateStore;

/// Open stores for one run. Holds the SQLite pool when either backend uses it.
pub struct Stores {
    pub state: Arc<dyn StateStore>,
    pub index: Arc<dyn IndexStore>,
    pool: Option<SqlitePool>,
}

impl Stores {
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

async fn sqlite_pool(config: &Config) -> Result<Option<SqlitePool>> {
    if !config.uses_sqlite() {
        return Ok(None);
    }
    let pool = db::connect(config).await?;
    migrate::create_tables(&pool).await?;
    Ok(Some(pool))
}

pub async fn open_state_store(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn StateStore>> {
    match config.state.backend.as_str() {
        "sqlite" => {
            let pool = pool.context("sqlite state backend needs a database pool")?;
            Ok(Arc::new(SqliteStateStore::new(pool.clone())))
        }
        "json" => Ok(Arc::new(JsonFileStateStore::open(&config.state.path).await?)),
        other => bail!("Unknown state backend: {}", other),
    }
}

pub fn open_index_store(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn IndexStore>> {
    match config.index.backend.as_str() {
        "sqlite" => {
            let pool = pool.context("sqlite index backend needs a database pool")?;
            Ok(Arc::new(SqliteIndex::new(pool.clone())))
        }
        "azure" => Ok(Arc::new(azure_index(config)?)),
        other => bail!("Unknown index backend: {}", other),
    }
}

fn azure_index(config: &Config) -> Result<AzureSearchIndex> {
    let azure = config
        .index
        .azure
        .as_ref()
        .context("index.backend = 'azure' requires an [index.azure] section")?;
    let dims = config
        .embedding
        .dims
        .context("embedding.dims is required for the azure index backend")?;
    AzureSearchIndex::new(azure, dims, config.embedding.timeout_secs)
}

/// Open both configured stores.
pub async fn open(config: &Config) -> Result<Stores> {
    let pool = sqlite_pool(config).await?;
    let state = open_state_store(config, pool.as_ref()).await?;
    let index = open_index_store(config, pool.as_ref())?;
    Ok(Stores { state, index, pool })
}

/// Open only the state store, for read-only commands.
pub async fn open_state_only(config: &Config) -> Result<(Arc<dyn StateStore>, Option<SqlitePool>)> {
    let pool = if config.state.backend == "sqlite" {
        sqlite_pool(config).await?
    } else {
        None
    };
    let state = open_state_store(config, pool.as_ref()).await?;
    Ok((state, pool))
}

/// `chix init`: create tables, pin dims, create the Azure index if needed.
pub async fn init(config: &Config) -> Result<()> {
    if config.uses_sqlite() {
        migrate::run_migrations(config).await?;
        info!(path = %config.db.path.display(), "database ready");
        println!("Database initialized at {}", config.db.path.display());
    }
    if config.index.backend == "azure" {
        let index = azure_index(config)?;
        let created = index.ensure_index().await?;
        let name = config
            .index
            .azure
            .as_ref()
            .map(|a| a.index_name.as_str())
            .unwrap_or_default();
        if created {
            println!("Created search index {}", name);
        } else {
            println!("Search index {} already exists", name);
        }
    }
    if config.state.backend == "json" {
        println!("State file: {}", config.state.path.display());
    }
    Ok(())
}
