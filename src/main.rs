//! # Codebase Indexer CLI (`codebase-indexer`)
//!
//! ## Usage
//!
//! ```bash
//! codebase-indexer [--config indexer.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codebase-indexer index <dir>` | Index a source tree for the current branch and commit |
//! | `codebase-indexer stats` | Show chunk counts per branch |
//!
//! ## Examples
//!
//! ```bash
//! # Index the working tree of a checkout
//! GIT_BRANCH=main GIT_HASH=$(git rev-parse HEAD) codebase-indexer index .
//!
//! # Local SQLite store with the offline embedder
//! codebase-indexer index ./src --store sqlite:.index/idx.db --provider hash
//!
//! # See what would be indexed
//! codebase-indexer index . --dry-run
//! ```
//!
//! Exit status is 0 on success (including "nothing to index"), 1 on a fatal
//! error and 130 when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codebase_indexer::config::{self, Config};
use codebase_indexer::embedding::create_embedder;
use codebase_indexer::models::BranchScope;
use codebase_indexer::pipeline::{run_index, IndexOptions, RunStatus};
use codebase_indexer::progress::ProgressMode;
use codebase_indexer::stats::collect_stats;
use codebase_indexer::store::open_store;

const EXIT_INTERRUPTED: u8 = 130;

/// Branch-aware incremental indexer for source trees.
///
/// Settings come from an optional TOML file; command-line flags override it.
#[derive(Parser)]
#[command(name = "codebase-indexer", version)]
struct Cli {
    /// Path to a configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory.
    ///
    /// Unchanged files are skipped, modified files are re-chunked, and
    /// entries from earlier commits on the same branch are removed.
    Index {
        /// Root directory to index.
        dir: PathBuf,

        /// Store location: `http(s)://host:port` (Chroma), `sqlite:<path>`, or `memory:`.
        #[arg(long)]
        store: Option<String>,

        /// Collection name.
        #[arg(long)]
        collection: Option<String>,

        /// Chunks per embedding/upsert batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent file workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Embedding provider: `tei`, `ollama`, `openai`, or `hash`.
        #[arg(long)]
        provider: Option<String>,

        /// Embedding model name.
        #[arg(long)]
        model: Option<String>,

        /// Embedding service URL.
        #[arg(long)]
        embed_url: Option<String>,

        /// Re-index every discovered file regardless of stored state.
        #[arg(long)]
        no_incremental: bool,

        /// Largest file to index, in MB.
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Branch the tree belongs to.
        #[arg(long, env = "GIT_BRANCH", default_value = "")]
        branch: String,

        /// Commit the tree was checked out at.
        #[arg(long, env = "GIT_HASH", default_value = "")]
        commit: String,

        /// Show file and chunk counts without writing to the store.
        #[arg(long)]
        dry_run: bool,

        /// Progress output: `auto`, `human`, `json`, or `off`.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Show what a collection holds, broken down by branch.
    Stats {
        /// Store location (see `index --store`).
        #[arg(long)]
        store: Option<String>,

        /// Collection name.
        #[arg(long)]
        collection: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Index {
            dir,
            store,
            collection,
            batch_size,
            workers,
            provider,
            model,
            embed_url,
            no_incremental,
            max_file_size,
            branch,
            commit,
            dry_run,
            progress,
        } => {
            if let Some(v) = store {
                cfg.store.location = v;
            }
            if let Some(v) = collection {
                cfg.store.collection = v;
            }
            if let Some(v) = batch_size {
                cfg.indexing.batch_size = v;
            }
            if let Some(v) = workers {
                cfg.indexing.workers = v;
            }
            if let Some(v) = provider {
                cfg.embedding.provider = v;
            }
            if model.is_some() {
                cfg.embedding.model = model;
            }
            if embed_url.is_some() {
                cfg.embedding.url = embed_url;
            }
            if no_incremental {
                cfg.indexing.incremental = false;
            }
            if let Some(v) = max_file_size {
                cfg.indexing.max_file_size_mb = v;
            }
            cfg.validate()?;

            let Some(mode) = ProgressMode::parse(&progress) else {
                bail!(
                    "Unknown progress mode: '{}'. Must be one of: auto, human, json, off",
                    progress
                );
            };
            if !dir.is_dir() {
                bail!("{} is not a directory", dir.display());
            }

            let scope = BranchScope::new(branch.trim(), commit.trim());
            let mut opts = IndexOptions::from_config(dir, scope, &cfg);
            opts.dry_run = dry_run;

            let store = open_store(
                &cfg.store.location,
                &cfg.store.collection,
                Duration::from_secs(cfg.store.timeout_secs),
            )
            .await?;
            let embedder = create_embedder(&cfg.embedding).await?;
            let model = embedder.model_name().to_string();

            let report = run_index(&opts, Arc::clone(&store), embedder, mode.reporter()).await?;
            report.print(&opts);

            if report.status != RunStatus::DryRun {
                let stats = collect_stats(store.as_ref(), &model, false).await?;
                stats.print();
            }
        }

        Commands::Stats { store, collection } => {
            if let Some(v) = store {
                cfg.store.location = v;
            }
            if let Some(v) = collection {
                cfg.store.collection = v;
            }
            cfg.validate()?;

            let store = open_store(
                &cfg.store.location,
                &cfg.store.collection,
                Duration::from_secs(cfg.store.timeout_secs),
            )
            .await?;
            let stats = collect_stats(store.as_ref(), &cfg.embedding.model_or_default(), true).await?;
            stats.print();
        }
    }

    Ok(())
}
