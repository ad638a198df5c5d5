//! # Change Indexer
//!
//! Keeps a vector search index in sync with a changing set of items
//! (Terraform resource changes, wiki pages, files) while paying for
//! embeddings only where content actually changed.
//!
//! Every run fingerprints the current items, diffs them against the state
//! persisted by earlier runs, embeds only new or modified items, refreshes
//! metadata-only changes without re-embedding, and deletes items that
//! disappeared.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Connectors  │──▶│  Planner   │──▶│ Apply phase │──▶│ Index store  │
//! │ TF/FS/JSONL │   │ (core crate)│   │ (tokio)     │   │ SQLite/Azure │
//! └─────────────┘   └─────▲──────┘   └──────┬──────┘   └──────────────┘
//!                         │                 │
//!                         │  ┌──────────────▼┐
//!                         └──│  State store  │
//!                            │ SQLite / JSON │
//!                            └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chix init                                   # create tables / search index
//! chix plan terraform --input plan.json       # what would change
//! chix run terraform --input plan.json        # embed, upsert, delete
//! chix state stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sources`] | Connector dispatch and status |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_terraform`] | Terraform plan connector |
//! | [`connector_jsonl`] | JSON Lines connector |
//! | [`embedding`] | OpenAI / Azure OpenAI providers |
//! | [`apply`] | Concurrent apply phase and run report |
//! | [`reconcile`] | Run orchestration |
//! | [`stores`] | State and index backend selection |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod apply;
pub mod config;
pub mod connector_fs;
pub mod connector_jsonl;
pub mod connector_terraform;
pub mod db;
pub mod embedding;
pub mod http;
pub mod index_azure;
pub mod index_sqlite;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod sources;
pub mod state_json;
pub mod state_sqlite;
pub mod status;
pub mod stores;
