//! # Codebase Indexer
//!
//! Branch-aware incremental indexing of a source tree into a vector store.
//!
//! A run discovers indexable files under a root directory, compares them with
//! what the store already holds for the current branch and commit, chunks the
//! files that need work, embeds the chunks in batches and upserts them. Entries
//! left behind by earlier commits on the same branch are retired; other
//! branches are never touched.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────────┐   ┌────────────┐
//! │ Discovery │──▶│ Changes  │──▶│ Chunk+Embed │──▶│ VectorStore│
//! │ walk+skip │   │ new/mod  │   │ worker pool │   │ Chroma/SQL │
//! └───────────┘   └──────────┘   └─────────────┘   └────────────┘
//!                       ▲                                 │
//!                       └──────── Branch lifecycle ◀──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! GIT_BRANCH=main GIT_HASH=$(git rev-parse HEAD) codebase-indexer index .
//! codebase-indexer stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunk metadata, branch scope, file records |
//! | [`discovery`] | Directory walk and ignore rules |
//! | [`changes`] | New/modified/unchanged partitioning |
//! | [`branch`] | Already-indexed check and stale entry retirement |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store backends |
//! | [`pipeline`] | The indexing run |
//! | [`stats`] | Collection summaries |

pub mod branch;
pub mod changes;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod store;
