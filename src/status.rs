//! `chix state list` and `chix state stats`.
//!
//! Read-only views of what the last runs recorded, for confidence that
//! runs are converging.

use anyhow::Result;
use sqlx::SqlitePool;

use change_indexer_core::store::StateStore;

use crate::config::Config;
use crate::stores;

/// Print every persisted entry: id, short fingerprint, last update.
pub async fn run_state_list(config: &Config) -> Result<()> {
    let (state, pool) = stores::open_state_only(config).await?;
    let snapshot = state.list_all().await;
    close(pool).await;
    let snapshot = snapshot?;

    println!("{:<56} {:<12} {:<12} UPDATED", "ID", "CONTENT", "METADATA");
    for (id, entry) in &snapshot {
        let meta = entry
            .metadata_fingerprint
            .as_ref()
            .map(|f| f.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<56} {:<12} {:<12} {}",
            id,
            entry.fingerprint.short(),
            meta,
            format_ts_relative(entry.updated_at)
        );
    }
    println!("{} entries", snapshot.len());
    Ok(())
}

async fn close(pool: Option<SqlitePool>) {
    if let Some(pool) = pool {
        pool.close().await;
    }
}

/// Counts behind `chix state stats`.
#[derive(Debug, Clone, Default)]
pub struct StateStats {
    pub entries: usize,
    pub without_metadata: usize,
    pub last_update: Option<i64>,
    /// Only for the sqlite index.
    pub index_records: Option<i64>,
    pub dims: Option<String>,
}

/// Gather state and index counts. Every pool opened here is closed
/// before returning, on error paths too.
pub async fn collect_state_stats(config: &Config) -> Result<StateStats> {
    let (state, pool) = stores::open_state_only(config).await?;
    let result = gather_stats(config, state.as_ref(), pool.as_ref()).await;
    close(pool).await;
    result
}

async fn gather_stats(
    config: &Config,
    state: &dyn StateStore,
    pool: Option<&SqlitePool>,
) -> Result<StateStats> {
    let snapshot = state.list_all().await?;
    let mut stats = StateStats {
        entries: snapshot.len(),
        without_metadata: snapshot
            .values()
            .filter(|e| e.metadata_fingerprint.is_none())
            .count(),
        last_update: snapshot.values().map(|e| e.updated_at).max(),
        ..StateStats::default()
    };

    if config.index.backend == "sqlite" {
        let own = match pool {
            Some(_) => None,
            None => {
                let pool = crate::db::connect(config).await?;
                crate::migrate::create_tables(&pool).await?;
                Some(pool)
            }
        };
        let counts = match pool.or(own.as_ref()) {
            Some(pool) => index_counts(pool).await,
            None => Ok((0, None)),
        };
        close(own).await;
        let (records, dims) = counts?;
        stats.index_records = Some(records);
        stats.dims = dims;
    }
    Ok(stats)
}

async fn index_counts(pool: &SqlitePool) -> Result<(i64, Option<String>)> {
    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_records")
        .fetch_one(pool)
        .await?;
    let dims: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(crate::migrate::DIMS_KEY)
        .fetch_optional(pool)
        .await?;
    Ok((records, dims))
}

/// Print counts of state entries and, for the sqlite index, index records.
pub async fn run_state_stats(config: &Config) -> Result<()> {
    let stats = collect_state_stats(config).await?;

    println!("Change Indexer: State Stats");
    println!("===========================");
    println!();
    match config.state.backend.as_str() {
        "json" => println!("  State:       json ({})", config.state.path.display()),
        other => println!("  State:       {} ({})", other, config.db.path.display()),
    }
    println!("  Index:       {}", config.index.backend);
    println!();
    println!("  Entries:     {}", stats.entries);
    if stats.without_metadata > 0 {
        println!("  No metadata fingerprint: {}", stats.without_metadata);
    }
    println!(
        "  Last update: {}",
        stats
            .last_update
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if let Some(records) = stats.index_records {
        let db_size = std::fs::metadata(&config.db.path)
            .map(|m| m.len())
            .unwrap_or(0);
        println!("  Index records: {}", records);
        println!(
            "  Dimensions:  {}",
            stats.dims.as_deref().unwrap_or("unset")
        );
        println!("  Database size: {}", format_bytes(db_size));
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
