//! Collection statistics.
//!
//! A quick summary of what a collection holds: total chunk count, the
//! embedding model in use, and a per-branch breakdown (commit, files,
//! chunks, last indexed). Used by `codebase-indexer stats` and printed
//! after every indexing run.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use crate::store::{MetadataFilter, VectorStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStats {
    pub branch: String,
    /// Distinct commits present on the branch, sorted.
    pub commits: Vec<String>,
    pub files: usize,
    pub chunks: usize,
    pub last_indexed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub backend: String,
    pub collection: String,
    pub model: String,
    pub chunks: usize,
    pub branches: Vec<BranchStats>,
}

#[derive(Default)]
struct BranchAccumulator {
    commits: HashSet<String>,
    files: HashSet<String>,
    chunks: usize,
    last_indexed_at: Option<i64>,
}

/// Gather stats. With `per_branch` false only the count is queried.
pub async fn collect_stats(
    store: &dyn VectorStore,
    model: &str,
    per_branch: bool,
) -> Result<CollectionStats> {
    let chunks = store.count().await?;

    let mut branches = Vec::new();
    if per_branch && chunks > 0 {
        let mut by_branch: BTreeMap<String, BranchAccumulator> = BTreeMap::new();
        for entry in store.get(&MetadataFilter::all(), None).await? {
            let m = entry.metadata;
            let acc = by_branch.entry(m.branch_name).or_default();
            acc.commits.insert(m.commit_hash);
            acc.files.insert(m.file_path);
            acc.chunks += 1;
            if m.indexed_at > 0 {
                acc.last_indexed_at = Some(acc.last_indexed_at.map_or(m.indexed_at, |t| t.max(m.indexed_at)));
            }
        }
        branches = by_branch
            .into_iter()
            .map(|(branch, acc)| {
                let mut commits: Vec<String> = acc.commits.into_iter().collect();
                commits.sort();
                BranchStats {
                    branch,
                    commits,
                    files: acc.files.len(),
                    chunks: acc.chunks,
                    last_indexed_at: acc.last_indexed_at,
                }
            })
            .collect();
    }

    Ok(CollectionStats {
        backend: store.backend().to_string(),
        collection: store.collection().to_string(),
        model: model.to_string(),
        chunks,
        branches,
    })
}

impl CollectionStats {
    pub fn print(&self) {
        println!("Collection Stats");
        println!("================");
        println!();
        println!("  Collection:  {} ({})", self.collection, self.backend);
        println!("  Model:       {}", self.model);
        println!("  Chunks:      {}", self.chunks);

        if !self.branches.is_empty() {
            println!();
            println!("  By branch:");
            println!(
                "  {:<24} {:<10} {:>7} {:>8}   {}",
                "BRANCH", "COMMIT", "FILES", "CHUNKS", "LAST INDEXED"
            );
            println!("  {}", "-".repeat(72));

            for b in &self.branches {
                let branch = if b.branch.is_empty() { "(none)" } else { b.branch.as_str() };
                let commit = match b.commits.as_slice() {
                    [] => "-".to_string(),
                    [only] if only.is_empty() => "-".to_string(),
                    [only] => crate::models::commit_prefix(only).to_string(),
                    many => format!("{} commits", many.len()),
                };
                let when = match b.last_indexed_at {
                    Some(ts) => format_ts_relative(ts),
                    None => "unknown".to_string(),
                };
                println!(
                    "  {:<24} {:<10} {:>7} {:>8}   {}",
                    branch, commit, b.files, b.chunks, when
                );
            }
        }

        println!();
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use crate::store::memory::InMemoryStore;
    use crate::store::ChunkRecord;

    fn record(id: &str, branch: &str, commit: &str, path: &str, at: i64) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document: String::new(),
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                branch_name: branch.to_string(),
                commit_hash: commit.to_string(),
                indexed_at: at,
                ..Default::default()
            },
            embedding: vec![0.0],
        }
    }

    #[tokio::test]
    async fn test_per_branch_breakdown() {
        let store = InMemoryStore::new("codebase");
        store
            .upsert(&[
                record("1", "main", "c1", "a.go", 100),
                record("2", "main", "c1", "a.go", 100),
                record("3", "main", "c1", "b.go", 200),
                record("4", "dev", "d1", "a.go", 50),
                record("5", "dev", "d2", "a.go", 60),
            ])
            .await
            .unwrap();

        let stats = collect_stats(&store, "feature-hash", true).await.unwrap();
        assert_eq!(stats.chunks, 5);
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.collection, "codebase");
        assert_eq!(stats.branches.len(), 2);

        let dev = &stats.branches[0];
        assert_eq!(dev.branch, "dev");
        assert_eq!(dev.commits, vec!["d1", "d2"]);
        assert_eq!(dev.files, 1);
        assert_eq!(dev.last_indexed_at, Some(60));

        let main = &stats.branches[1];
        assert_eq!(main.files, 2);
        assert_eq!(main.chunks, 3);
        assert_eq!(main.last_indexed_at, Some(200));
    }

    #[tokio::test]
    async fn test_count_only() {
        let store = InMemoryStore::new("codebase");
        store.upsert(&[record("1", "main", "c1", "a.go", 1)]).await.unwrap();
        let stats = collect_stats(&store, "m", false).await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert!(stats.branches.is_empty());
    }

    #[test]
    fn test_format_ts_relative_recent() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
