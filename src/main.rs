//! # Change Indexer CLI (`chix`)
//!
//! ## Usage
//!
//! ```bash
//! chix --config ./config/chix.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chix init` | Create tables, pin the vector dimension, create the Azure index |
//! | `chix sources` | List connectors and their status |
//! | `chix plan <connector>` | Classify items against state without writing |
//! | `chix run <connector>` | Embed new/modified items, update metadata, delete removed ones |
//! | `chix state list` | Print persisted fingerprints |
//! | `chix state stats` | Counts of state entries and index records |
//!
//! ## Examples
//!
//! ```bash
//! terraform show -json tfplan > plan.json
//! chix plan terraform --input plan.json
//! chix run terraform --input plan.json --progress human
//!
//! # Re-embed everything, e.g. after switching models
//! chix run filesystem --full
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use change_indexer::progress::ProgressMode;
use change_indexer::reconcile::{self, RunOptions};
use change_indexer::{config, logging, sources, status, stores};

/// Change-aware indexer: embed only what changed.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chix.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chix",
    about = "Change-aware indexer: keeps a vector index in sync, embedding only what changed",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chix.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize storage.
    ///
    /// Creates the SQLite tables used by the sqlite backends, records the
    /// configured vector dimension, and creates the Azure AI Search index
    /// when that backend is configured. Idempotent.
    Init,

    /// List available connectors and their status.
    Sources,

    /// Show what a run would do, without writing anything.
    Plan {
        /// Connector: `terraform`, `filesystem`, or `jsonl`.
        connector: String,

        /// Input file for `terraform` / `jsonl`, overriding the config.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Treat every current item as modified.
        #[arg(long)]
        full: bool,
    },

    /// Reconcile the index with a connector's current items.
    ///
    /// Exits with status 1 if any item failed; rerunning retries exactly
    /// the failed items.
    Run {
        /// Connector: `terraform`, `filesystem`, or `jsonl`.
        connector: String,

        /// Input file for `terraform` / `jsonl`, overriding the config.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Re-embed every current item, ignoring stored fingerprints.
        #[arg(long)]
        full: bool,

        /// Print the plan and stop.
        #[arg(long)]
        dry_run: bool,

        /// Concurrent apply tasks, overriding `apply.concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Inspect persisted state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print every state entry.
    List,
    /// Print entry and index record counts.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            stores::init(&cfg).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Plan {
            connector,
            input,
            full,
        } => {
            reconcile::run_plan(&cfg, &connector, input.as_deref(), full).await?;
        }
        Commands::Run {
            connector,
            input,
            full,
            dry_run,
            concurrency,
            progress,
        } => {
            if concurrency == Some(0) {
                anyhow::bail!("--concurrency must be >= 1");
            }
            let options = RunOptions {
                full,
                dry_run,
                concurrency,
                progress: progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty),
            };
            let report = reconcile::run_reconcile(&cfg, &connector, input.as_deref(), &options).await?;
            if report.has_failures() {
                std::process::exit(1);
            }
        }
        Commands::State { action } => match action {
            StateAction::List => status::run_state_list(&cfg).await?,
            StateAction::Stats => status::run_state_stats(&cfg).await?,
        },
    }

    Ok(())
}
