//! Error taxonomy shared by the planner, the stores, and the providers.
//!
//! Run-level errors ([`IndexerError::DuplicateItem`],
//! [`IndexerError::EmptyItemId`], a [`IndexerError::StateStore`] raised
//! while loading the snapshot) abort a run before anything is applied.
//! Item-level errors ([`IndexerError::EmbeddingProvider`],
//! [`IndexerError::IndexWrite`]) carry an [`ErrorKind`] that decides
//! whether the apply phase retries them.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Whether a failed external call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limit, timeout, connection failure, 5xx.
    Transient,
    /// Invalid input, auth failure, schema mismatch.
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("invalid fingerprint '{value}': {reason}")]
    Fingerprint { value: String, reason: String },

    #[error("duplicate item id in input set: '{0}'")]
    DuplicateItem(String),

    #[error("item at position {0} has an empty id")]
    EmptyItemId(usize),

    #[error("embedding provider error ({kind}): {message}")]
    EmbeddingProvider { kind: ErrorKind, message: String },

    #[error("index write error ({kind}): {message}")]
    IndexWrite { kind: ErrorKind, message: String },

    #[error("state store error: {0}")]
    StateStore(String),
}

impl IndexerError {
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        IndexerError::EmbeddingProvider {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn embedding_permanent(message: impl Into<String>) -> Self {
        IndexerError::EmbeddingProvider {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn index_transient(message: impl Into<String>) -> Self {
        IndexerError::IndexWrite {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn index_permanent(message: impl Into<String>) -> Self {
        IndexerError::IndexWrite {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn state(message: impl fmt::Display) -> Self {
        IndexerError::StateStore(message.to_string())
    }

    /// True only for provider and index errors classified as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexerError::EmbeddingProvider {
                kind: ErrorKind::Transient,
                ..
            } | IndexerError::IndexWrite {
                kind: ErrorKind::Transient,
                ..
            }
        )
    }
}
