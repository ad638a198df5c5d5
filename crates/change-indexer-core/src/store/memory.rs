//! In-memory [`StateStore`] and [`IndexStore`] implementations.
//!
//! Used by tests and by callers that embed the planner in a larger
//! process. Both use `HashMap`/`BTreeMap` behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

use async_trait::async_trait;

use crate::error::{IndexerError, Result};
use crate::fingerprint::Fingerprint;
use crate::models::{IndexRecord, Metadata, StateEntry, StateSnapshot};

use super::{IndexStore, StateStore};

/// In-memory state store.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: RwLock<StateSnapshot>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. with a snapshot from a previous run.
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            entries: RwLock::new(snapshot),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> IndexerError {
    IndexerError::state("in-memory state lock poisoned")
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, id: &str) -> Result<Option<StateEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(id).cloned())
    }

    async fn set(&self, id: &str, entry: &StateEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(id.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(id);
        Ok(())
    }

    async fn list_all(&self) -> Result<StateSnapshot> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.clone())
    }
}

/// In-memory vector index.
///
/// The vector dimension is fixed by the first upsert (or by
/// [`with_dims`](InMemoryIndex::with_dims)) and never changes, even
/// after every record is deleted.
#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<String, IndexRecord>>,
    dims: OnceLock<usize>,
    writes: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index whose dimension is fixed up front.
    pub fn with_dims(dims: usize) -> Self {
        let index = Self::default();
        let _ = index.dims.set(dims);
        index
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims.get().copied()
    }

    /// Write calls received so far (upserts, metadata updates, deletes).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<IndexRecord> {
        self.records.read().ok().and_then(|r| r.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted ids of all stored records.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

fn index_poisoned() -> IndexerError {
    IndexerError::index_permanent("in-memory index lock poisoned")
}

#[async_trait]
impl IndexStore for InMemoryIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().map_err(|_| index_poisoned())?;
        let dims = *self.dims.get_or_init(|| record.embedding.len());
        if dims != record.embedding.len() {
            return Err(IndexerError::index_permanent(format!(
                "index holds {}-dimensional vectors, record '{}' has {}",
                dims,
                record.id,
                record.embedding.len()
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        metadata: &Metadata,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().map_err(|_| index_poisoned())?;
        match records.get_mut(id) {
            Some(record) => {
                record.metadata = metadata.clone();
                record.fingerprint = fingerprint.clone();
                Ok(())
            }
            None => Err(IndexerError::index_permanent(format!(
                "no record '{}' to update metadata on",
                id
            ))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().map_err(|_| index_poisoned())?;
        records.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn record(id: &str, dims: usize) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            canonical_text: "text".to_string(),
            metadata: Metadata::new(),
            fingerprint: fingerprint("text"),
            embedding: vec![0.5; dims],
        }
    }

    #[tokio::test]
    async fn state_roundtrip() {
        let store = InMemoryStateStore::new();
        let entry = StateEntry {
            fingerprint: fingerprint("a"),
            metadata_fingerprint: None,
            updated_at: 1,
        };
        store.set("a", &entry).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(entry));
        assert_eq!(store.list_all().await.unwrap().len(), 1);
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn index_upsert_idempotent() {
        let index = InMemoryIndex::new();
        index.upsert(&record("a", 3)).await.unwrap();
        index.upsert(&record("a", 3)).await.unwrap();
        assert_eq!(index.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn index_rejects_dimension_change() {
        let index = InMemoryIndex::new();
        index.upsert(&record("a", 3)).await.unwrap();
        let err = index.upsert(&record("b", 4)).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn index_dimension_survives_emptying() {
        let index = InMemoryIndex::new();
        index.upsert(&record("a", 3)).await.unwrap();
        index.delete("a").await.unwrap();
        assert!(index.is_empty());
        assert!(index.upsert(&record("b", 4)).await.is_err());
        assert_eq!(index.dims(), Some(3));
        assert_eq!(index.writes(), 3);

        let pinned = InMemoryIndex::with_dims(2);
        assert!(pinned.upsert(&record("a", 3)).await.is_err());
        pinned.upsert(&record("a", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn metadata_update_keeps_vector() {
        let index = InMemoryIndex::new();
        index.upsert(&record("a", 2)).await.unwrap();
        let mut meta = Metadata::new();
        meta.insert("title".into(), "New".into());
        index
            .upsert_metadata("a", &meta, &fingerprint("text"))
            .await
            .unwrap();
        let stored = index.get("a").unwrap();
        assert_eq!(stored.metadata, meta);
        assert_eq!(stored.embedding, vec![0.5, 0.5]);
        assert!(index
            .upsert_metadata("missing", &meta, &fingerprint("x"))
            .await
            .is_err());
    }
}
