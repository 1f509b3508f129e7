//! Fatal and recovered outcomes of an indexing run.

use thiserror::Error;

/// Errors that abort a run.
///
/// Per-file problems and lifecycle bookkeeping never surface here; they are
/// recorded as [`FileOutcome`] and [`Cleanup`] values instead.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("setup failed: {0:#}")]
    Setup(anyhow::Error),

    #[error("embedding failed for batch {batch}: {source:#}")]
    Embedding {
        batch: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("store write failed for batch {batch}: {source:#}")]
    Store {
        batch: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding returned {got} vectors for {expected} texts in batch {batch}")]
    EmbeddingMismatch {
        batch: u64,
        expected: usize,
        got: usize,
    },
}

/// Result of a best-effort lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Removed(usize),
    Nothing,
    Failed(String),
}

impl Cleanup {
    pub fn removed(&self) -> usize {
        match self {
            Cleanup::Removed(n) => *n,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Cleanup::Failed(_))
    }
}

/// What happened to one scheduled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Chunked(usize),
    /// Above the size ceiling or empty.
    Skipped(String),
    Failed(String),
}
