//! Core data models used throughout the indexer.
//!
//! These types represent the items produced by connectors, the records
//! written to an index, and the per-item state persisted between runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// A metadata value carried into the index record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Text(s) => f.write_str(s),
            MetadataValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n as f64)
    }
}

/// Item metadata. Ordered so that its fingerprint is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A logical unit to index: a Terraform resource change, a wiki page, a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier (resource address, page id, relative path).
    pub id: String,
    /// Text whose changes trigger re-embedding.
    pub canonical_text: String,
    /// Carried into the index, excluded from the content fingerprint.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Item {
    pub fn new(id: impl Into<String>, canonical_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            canonical_text: canonical_text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The record written to an index store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub canonical_text: String,
    pub metadata: Metadata,
    pub fingerprint: Fingerprint,
    pub embedding: Vec<f32>,
}

/// Persisted per-item state used to detect drift across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub fingerprint: Fingerprint,
    /// `None` for entries written before metadata tracking was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_fingerprint: Option<Fingerprint>,
    /// Unix seconds of the last successful apply for this id.
    pub updated_at: i64,
}

/// Snapshot of the whole state store, keyed by item id.
pub type StateSnapshot = BTreeMap<String, StateEntry>;
