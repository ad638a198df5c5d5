//! Storage abstractions for the indexer.
//!
//! Two traits split the persistence the apply phase talks to:
//!
//! - [`StateStore`]: the durable `id → fingerprint` mapping the planner
//!   diffs against. Owned exclusively by the indexer.
//! - [`IndexStore`]: the search index holding records and vectors.
//!
//! Implementations must be `Send + Sync` and must tolerate concurrent
//! calls for *different* ids; the apply phase never issues two concurrent
//! calls for the same id.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::models::{IndexRecord, Metadata, StateEntry, StateSnapshot};

/// Durable per-item state.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](StateStore::get) | Read one entry |
/// | [`set`](StateStore::set) | Insert or replace one entry |
/// | [`delete`](StateStore::delete) | Remove one entry (missing is fine) |
/// | [`list_all`](StateStore::list_all) | Snapshot every entry |
///
/// Writes must be visible to subsequent reads in the same process.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<StateEntry>>;

    async fn set(&self, id: &str, entry: &StateEntry) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn list_all(&self) -> Result<StateSnapshot>;
}

/// A vector index keyed by item id.
///
/// Upserts must be idempotent: writing the same record twice leaves the
/// index as if it had been written once. Deleting an id that is not
/// present succeeds.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace a full record, vector included.
    async fn upsert(&self, record: &IndexRecord) -> Result<()>;

    /// Rewrite metadata for an existing record, keeping its vector.
    async fn upsert_metadata(
        &self,
        id: &str,
        metadata: &Metadata,
        fingerprint: &Fingerprint,
    ) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}
