//! JSON-file [`StateStore`].
//!
//! Keeps the whole state in memory and rewrites the file after every
//! change. Writes go to a sibling temp file that is then renamed over the
//! original, so a crash mid-write leaves the previous state intact.
//!
//! File shape:
//!
//! ```json
//! {
//!   "version": 1,
//!   "items": {
//!     "aws_s3_bucket.logs": { "fingerprint": "…", "metadata_fingerprint": "…", "updated_at": 1700000000 }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use change_indexer_core::error::{IndexerError, Result};
use change_indexer_core::models::{StateEntry, StateSnapshot};
use change_indexer_core::store::StateStore;

const FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    items: StateSnapshot,
}

pub struct JsonFileStateStore {
    path: PathBuf,
    entries: Mutex<StateSnapshot>,
}

impl JsonFileStateStore {
    /// Load the state file. A missing file is an empty state.
    pub async fn open(path: &Path) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) => parse_state_file(&content, path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateSnapshot::new(),
            Err(e) => {
                return Err(IndexerError::state(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &StateSnapshot) -> Result<()> {
        let file = StateFile {
            version: FILE_VERSION,
            items: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(IndexerError::state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(IndexerError::state)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| IndexerError::state(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            IndexerError::state(format!("failed to replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

fn parse_state_file(content: &str, path: &Path) -> Result<StateSnapshot> {
    if content.trim().is_empty() {
        return Ok(StateSnapshot::new());
    }
    let file: StateFile = serde_json::from_str(content).map_err(|e| {
        IndexerError::state(format!("corrupt state file {}: {}", path.display(), e))
    })?;
    if file.version != FILE_VERSION {
        return Err(IndexerError::state(format!(
            "unsupported state file version {} in {}",
            file.version,
            path.display()
        )));
    }
    Ok(file.items)
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get(&self, id: &str) -> Result<Option<StateEntry>> {
        Ok(self.entries.lock().await.get(id).cloned())
    }

    async fn set(&self, id: &str, entry: &StateEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(id.to_string(), entry.clone());
        if let Err(e) = self.persist(&entries).await {
            // Memory must not claim what the file does not hold.
            match previous {
                Some(prev) => entries.insert(id.to_string(), prev),
                None => entries.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries).await {
            entries.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<StateSnapshot> {
        Ok(self.entries.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use change_indexer_core::fingerprint::fingerprint;
    use tempfile::TempDir;

    fn entry(text: &str) -> StateEntry {
        StateEntry {
            fingerprint: fingerprint(text),
            metadata_fingerprint: None,
            updated_at: 7,
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(&tmp.path().join("state.json"))
            .await
            .unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        {
            let store = JsonFileStateStore::open(&path).await.unwrap();
            store.set("page-1", &entry("one")).await.unwrap();
            store.set("page-2", &entry("two")).await.unwrap();
            store.delete("page-1").await.unwrap();
        }
        let store = JsonFileStateStore::open(&path).await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["page-2"], entry("two"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStateStore::open(&path).await,
            Err(IndexerError::StateStore(_))
        ));

        std::fs::write(
            &path,
            r#"{"version": 1, "items": {"a": {"fingerprint": "short", "updated_at": 0}}}"#,
        )
        .unwrap();
        assert!(JsonFileStateStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, r#"{"version": 9, "items": {}}"#).unwrap();
        assert!(JsonFileStateStore::open(&path).await.is_err());
    }
}
