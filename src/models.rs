//! Core data models used throughout the indexer.
//!
//! These types describe the branch scope a run operates in, the chunks that
//! flow from the chunker to the store, and the per-file records rebuilt from
//! store metadata at the start of every run.

use serde::{Deserialize, Serialize};

/// Number of commit-hash characters used in chunk identifiers.
pub const COMMIT_PREFIX_LEN: usize = 8;

/// The (branch, commit) pair that partitions the index.
///
/// Empty strings mean "not supplied". Without a branch name the lifecycle
/// checks are skipped; without a commit hash every discovered file is
/// re-indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchScope {
    pub branch: String,
    pub commit: String,
}

impl BranchScope {
    pub fn new(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            branch: branch.into().trim().to_string(),
            commit: commit.into().trim().to_string(),
        }
    }

    pub fn has_branch(&self) -> bool {
        !self.branch.is_empty()
    }

    pub fn has_commit(&self) -> bool {
        !self.commit.is_empty()
    }

    /// Leading characters of the commit hash, as used in chunk ids.
    pub fn commit_prefix(&self) -> &str {
        commit_prefix(&self.commit)
    }
}

/// Truncate a commit hash to [`COMMIT_PREFIX_LEN`] characters.
pub fn commit_prefix(commit: &str) -> &str {
    match commit.char_indices().nth(COMMIT_PREFIX_LEN) {
        Some((idx, _)) => &commit[..idx],
        None => commit,
    }
}

/// Provenance metadata stored alongside every chunk.
///
/// Field names on the wire match the metadata keys existing collections
/// were written with (`git_branch`, `git_commit`, `file_hash`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: usize,
    #[serde(default, rename = "file_type")]
    pub file_extension: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub file_hash: String,
    #[serde(default, rename = "git_commit")]
    pub commit_hash: String,
    #[serde(default, rename = "git_branch")]
    pub branch_name: String,
    #[serde(default)]
    pub indexed_at: i64,
    #[serde(default)]
    pub mtime: i64,
}

/// A contiguous, line-aligned slice of a file plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Storage identifier: branch, commit prefix, path and line range.
    ///
    /// Two chunks with the same boundaries on the same branch and commit
    /// share an id, so the later upsert wins.
    pub fn id(&self) -> String {
        let m = &self.metadata;
        format!(
            "{}_{}_{}_{}_{}",
            m.branch_name,
            commit_prefix(&m.commit_hash),
            m.file_path,
            m.start_line,
            m.end_line
        )
    }
}

/// What the store remembers about a previously indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFileRecord {
    pub path: String,
    pub commit_hash: String,
    pub file_content_hash: String,
    pub last_seen_mtime: i64,
}

impl From<&ChunkMetadata> for IndexedFileRecord {
    fn from(m: &ChunkMetadata) -> Self {
        Self {
            path: m.file_path.clone(),
            commit_hash: m.commit_hash.clone(),
            file_content_hash: m.file_hash.clone(),
            last_seen_mtime: m.mtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(branch: &str, commit: &str) -> Chunk {
        Chunk {
            text: "fn main() {}".to_string(),
            metadata: ChunkMetadata {
                file_path: "src/main.rs".to_string(),
                start_line: 1,
                end_line: 12,
                branch_name: branch.to_string(),
                commit_hash: commit.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_chunk_id_uses_commit_prefix() {
        let c = chunk("main", "0123456789abcdef");
        assert_eq!(c.id(), "main_01234567_src/main.rs_1_12");
    }

    #[test]
    fn test_chunk_id_short_commit() {
        let c = chunk("dev", "abc");
        assert_eq!(c.id(), "dev_abc_src/main.rs_1_12");
    }

    #[test]
    fn test_chunk_id_without_scope() {
        let c = chunk("", "");
        assert_eq!(c.id(), "__src/main.rs_1_12");
    }

    #[test]
    fn test_scope_trims_and_reports_presence() {
        let scope = BranchScope::new(" main ", "");
        assert_eq!(scope.branch, "main");
        assert!(scope.has_branch());
        assert!(!scope.has_commit());
    }

    #[test]
    fn test_metadata_wire_names() {
        let m = ChunkMetadata {
            file_path: "a.go".to_string(),
            commit_hash: "c1".to_string(),
            branch_name: "main".to_string(),
            file_extension: ".go".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["git_commit"], "c1");
        assert_eq!(json["git_branch"], "main");
        assert_eq!(json["file_type"], ".go");
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let m: ChunkMetadata =
            serde_json::from_str(r#"{"file_path": "x.py", "git_commit": "c9"}"#).unwrap();
        assert_eq!(m.file_path, "x.py");
        assert_eq!(m.commit_hash, "c9");
        assert_eq!(m.mtime, 0);
    }
}
