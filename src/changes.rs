//! Change detection against previously indexed state.
//!
//! The store is the only durable memory of past runs, so the per-file
//! records are rebuilt from chunk metadata at the start of every run and
//! compared with the freshly discovered candidates.

use std::collections::HashMap;

use anyhow::Result;

use crate::discovery::DiscoveredFile;
use crate::models::{BranchScope, IndexedFileRecord};
use crate::store::{MetadataFilter, VectorStore};

/// Why a file was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFile {
    pub file: DiscoveredFile,
    pub kind: ChangeKind,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub to_index: Vec<ScheduledFile>,
    pub unchanged: Vec<DiscoveredFile>,
}

impl ChangeSet {
    pub fn new_count(&self) -> usize {
        self.to_index.iter().filter(|f| f.kind == ChangeKind::New).count()
    }

    pub fn modified_count(&self) -> usize {
        self.to_index
            .iter()
            .filter(|f| f.kind == ChangeKind::Modified)
            .count()
    }

    /// Every candidate scheduled as new, for non-incremental runs.
    pub fn schedule_all(candidates: Vec<DiscoveredFile>) -> Self {
        Self {
            to_index: candidates
                .into_iter()
                .map(|file| ScheduledFile {
                    file,
                    kind: ChangeKind::New,
                })
                .collect(),
            unchanged: Vec::new(),
        }
    }
}

/// Per-path records for the current branch scope. Entries written without a
/// branch carry an empty branch name and form a scope of their own. The
/// first entry seen for a path wins.
pub async fn load_indexed_records(
    store: &dyn VectorStore,
    scope: &BranchScope,
) -> Result<HashMap<String, IndexedFileRecord>> {
    let filter = MetadataFilter::branch(scope.branch.clone());

    let mut records = HashMap::new();
    for entry in store.get(&filter, None).await? {
        if entry.metadata.file_path.is_empty() {
            continue;
        }
        records
            .entry(entry.metadata.file_path.clone())
            .or_insert_with(|| IndexedFileRecord::from(&entry.metadata));
    }
    Ok(records)
}

/// Split candidates into files to (re)index and files left alone.
///
/// A file is scheduled when it has no record, or when a commit is known and
/// the record's commit differs from it. Without a commit everything is
/// scheduled. Content hash and mtime do not influence the decision.
pub fn partition(
    candidates: Vec<DiscoveredFile>,
    records: &HashMap<String, IndexedFileRecord>,
    scope: &BranchScope,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    for file in candidates {
        let kind = match records.get(&file.relative) {
            None => Some(ChangeKind::New),
            Some(_) if !scope.has_commit() => Some(ChangeKind::Modified),
            Some(record) if record.commit_hash != scope.commit => Some(ChangeKind::Modified),
            Some(_) => None,
        };
        match kind {
            Some(kind) => set.to_index.push(ScheduledFile { file, kind }),
            None => set.unchanged.push(file),
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use crate::store::memory::InMemoryStore;
    use crate::store::ChunkRecord;
    use std::path::PathBuf;

    fn file(rel: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from("/repo").join(rel),
            relative: rel.to_string(),
        }
    }

    fn record(path: &str, commit: &str) -> IndexedFileRecord {
        IndexedFileRecord {
            path: path.to_string(),
            commit_hash: commit.to_string(),
            file_content_hash: "h".to_string(),
            last_seen_mtime: 0,
        }
    }

    fn stored(id: &str, branch: &str, commit: &str, path: &str, mtime: i64) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document: String::new(),
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                branch_name: branch.to_string(),
                commit_hash: commit.to_string(),
                mtime,
                ..Default::default()
            },
            embedding: vec![0.0],
        }
    }

    #[test]
    fn test_new_modified_unchanged() {
        let records: HashMap<_, _> = [
            ("a.go".to_string(), record("a.go", "c1")),
            ("b.go".to_string(), record("b.go", "c2")),
        ]
        .into_iter()
        .collect();
        let scope = BranchScope::new("main", "c2");

        let set = partition(vec![file("a.go"), file("b.go"), file("c.go")], &records, &scope);
        let scheduled: Vec<(&str, ChangeKind)> = set
            .to_index
            .iter()
            .map(|s| (s.file.relative.as_str(), s.kind))
            .collect();
        assert_eq!(
            scheduled,
            vec![("a.go", ChangeKind::Modified), ("c.go", ChangeKind::New)]
        );
        assert_eq!(set.unchanged, vec![file("b.go")]);
        assert_eq!(set.new_count(), 1);
        assert_eq!(set.modified_count(), 1);
    }

    #[test]
    fn test_without_commit_everything_is_scheduled() {
        let records: HashMap<_, _> = [("a.go".to_string(), record("a.go", ""))]
            .into_iter()
            .collect();
        let scope = BranchScope::new("", "");
        let set = partition(vec![file("a.go"), file("b.go")], &records, &scope);
        assert_eq!(set.to_index.len(), 2);
        assert!(set.unchanged.is_empty());
    }

    #[test]
    fn test_empty_stored_commit_counts_as_modified() {
        let records: HashMap<_, _> = [("a.go".to_string(), record("a.go", ""))]
            .into_iter()
            .collect();
        let set = partition(vec![file("a.go")], &records, &BranchScope::new("main", "c1"));
        assert_eq!(set.modified_count(), 1);
    }

    #[tokio::test]
    async fn test_load_records_scoped_to_branch_first_seen_wins() {
        let store = InMemoryStore::new("codebase");
        store
            .upsert(&[
                stored("1", "main", "c1", "a.go", 10),
                stored("2", "main", "c1", "a.go", 20),
                stored("3", "dev", "c9", "b.go", 30),
                stored("4", "", "", "c.go", 40),
            ])
            .await
            .unwrap();

        let records = load_indexed_records(&store, &BranchScope::new("main", "c1"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["a.go"].last_seen_mtime, 10);

        let dev = load_indexed_records(&store, &BranchScope::new("dev", "c9"))
            .await
            .unwrap();
        assert_eq!(dev.len(), 1);
        assert_eq!(dev["b.go"].commit_hash, "c9");

        let unscoped = load_indexed_records(&store, &BranchScope::default())
            .await
            .unwrap();
        assert_eq!(unscoped.len(), 1);
        assert!(unscoped.contains_key("c.go"));
    }
}
