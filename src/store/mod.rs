//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only surface the indexer needs from a
//! store: exact-match filtered reads and deletes, upserts, and a count.
//! Backends:
//!
//! | Location | Backend |
//! |----------|---------|
//! | `http://host:port`, `https://…` | [`chroma::ChromaStore`] |
//! | `sqlite:<path>`, `*.sqlite`, `*.db` | [`sqlite::SqliteStore`] |
//! | `memory:` | [`memory::InMemoryStore`] |
//!
//! Implementations must be `Send + Sync`; the orchestrator shares one
//! instance between the lifecycle manager and the flush path.

pub mod chroma;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::ChunkMetadata;

/// Metadata keys shared by every backend's filter translation.
pub const KEY_BRANCH: &str = "git_branch";
pub const KEY_COMMIT: &str = "git_commit";
pub const KEY_FILE_PATH: &str = "file_path";

/// Conjunction of exact-match conditions on chunk metadata.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub file_path: Option<String>,
}

impl MetadataFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default()
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions().is_empty()
    }

    /// `(metadata key, expected value)` pairs in a fixed order.
    pub fn conditions(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::with_capacity(3);
        if let Some(b) = &self.branch {
            out.push((KEY_BRANCH, b.as_str()));
        }
        if let Some(c) = &self.commit {
            out.push((KEY_COMMIT, c.as_str()));
        }
        if let Some(p) = &self.file_path {
            out.push((KEY_FILE_PATH, p.as_str()));
        }
        out
    }

    pub fn matches(&self, m: &ChunkMetadata) -> bool {
        self.branch.as_deref().map_or(true, |b| m.branch_name == b)
            && self.commit.as_deref().map_or(true, |c| m.commit_hash == c)
            && self.file_path.as_deref().map_or(true, |p| m.file_path == p)
    }
}

/// An entry read back from the store: id and metadata only.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub metadata: ChunkMetadata,
}

/// One row of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Ids(Vec<String>),
    Filter(MetadataFilter),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and stats.
    fn backend(&self) -> &'static str;

    fn collection(&self) -> &str;

    /// Entries matching `filter`, up to `limit` when given.
    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<StoredRecord>>;

    /// Insert or replace records by id.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()>;

    async fn delete(&self, target: &DeleteTarget) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// Parsed form of a store location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Chroma(String),
    Sqlite(PathBuf),
    Memory,
}

impl StoreLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Self::Chroma(location.trim_end_matches('/').to_string()));
        }
        if location == "memory:" || location == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(path) = location.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if path.is_empty() {
                bail!("sqlite store location is missing a path");
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if location.ends_with(".sqlite") || location.ends_with(".db") {
            return Ok(Self::Sqlite(PathBuf::from(location)));
        }
        bail!(
            "Unrecognized store location '{}'. Use http(s)://host:port, sqlite:<path>, or memory:",
            location
        )
    }
}

/// Open (and create if needed) the collection at `location`.
pub async fn open_store(
    location: &str,
    collection: &str,
    timeout: Duration,
) -> Result<Arc<dyn VectorStore>> {
    match StoreLocation::parse(location)? {
        StoreLocation::Chroma(url) => Ok(Arc::new(
            chroma::ChromaStore::connect(&url, collection, timeout).await?,
        )),
        StoreLocation::Sqlite(path) => {
            Ok(Arc::new(sqlite::SqliteStore::open(&path, collection).await?))
        }
        StoreLocation::Memory => Ok(Arc::new(memory::InMemoryStore::new(collection))),
    }
}
