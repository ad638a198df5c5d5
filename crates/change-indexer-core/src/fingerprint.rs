//! Content fingerprinting.
//!
//! A [`Fingerprint`] is the SHA-256 digest of an item's canonical text,
//! rendered as 64 lowercase hex characters. It is computed for every item
//! on every run, so it has to stay a single pass over the bytes.
//!
//! ```rust
//! use change_indexer_core::fingerprint::fingerprint;
//!
//! let a = fingerprint("create logs");
//! assert_eq!(a, fingerprint("create logs"));
//! assert_ne!(a, fingerprint("create logs v2"));
//! assert_eq!(a.as_str().len(), 64);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IndexerError;
use crate::models::{Metadata, MetadataValue};

const HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validate a fingerprint read back from persisted state.
    pub fn parse(value: &str) -> Result<Self, IndexerError> {
        if value.len() != HEX_LEN {
            return Err(IndexerError::Fingerprint {
                value: value.to_string(),
                reason: format!("expected {} hex characters, got {}", HEX_LEN, value.len()),
            });
        }
        if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(IndexerError::Fingerprint {
                value: value.to_string(),
                reason: "expected lowercase hex".to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IndexerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fingerprint::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Fingerprint an item's canonical text.
pub fn fingerprint(canonical_text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Fingerprint item metadata.
///
/// Entries are fed in key order with length prefixes and a type tag, so
/// `{"a": "1"}` and `{"a": 1}` hash differently and no two maps collide
/// through concatenation.
pub fn metadata_fingerprint(metadata: &Metadata) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((metadata.len() as u64).to_le_bytes());
    for (key, value) in metadata {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        match value {
            MetadataValue::Text(s) => {
                hasher.update([b's']);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            MetadataValue::Number(n) => {
                hasher.update([b'n']);
                // Normalize -0.0 so equal numbers hash equally.
                let n = if *n == 0.0 { 0.0 } else { *n };
                hasher.update(n.to_bits().to_le_bytes());
            }
        }
    }
    Fingerprint(hex::encode(hasher.finalize()))
}
