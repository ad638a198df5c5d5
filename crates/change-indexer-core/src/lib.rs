//! # Change Indexer Core
//!
//! Runtime-free logic for the change-aware indexer: the item model,
//! content fingerprinting, the reconciliation planner, the retry policy,
//! and the storage / embedding traits with in-memory implementations.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `change-indexer` app crate provides the concrete stores, providers,
//! the concurrent apply phase, and the `chix` CLI.

pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod plan;
pub mod retry;
pub mod store;

pub use error::{ErrorKind, IndexerError, Result};
pub use fingerprint::{fingerprint, metadata_fingerprint, Fingerprint};
pub use models::{IndexRecord, Item, Metadata, MetadataValue, StateEntry, StateSnapshot};
pub use plan::{build_plan, ChangeKind, EmbedTask, MetadataTask, PlanOptions, ReconcilePlan};
pub use retry::RetryPolicy;
