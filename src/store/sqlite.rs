//! SQLite-backed [`VectorStore`].
//!
//! A single `chunks` table holds every collection, keyed by
//! `(collection, id)`. The metadata keys used for filtering are copied into
//! their own indexed columns; the full metadata record is kept as JSON and
//! vectors as little-endian `f32` BLOBs.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::models::ChunkMetadata;

use super::{ChunkRecord, DeleteTarget, MetadataFilter, StoredRecord, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open the database at `path`, creating the file and schema if missing.
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite store at {}", path.display()))?;

        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        store.migrate().await?;
        tracing::debug!("Opened SQLite store {} (collection {})", path.display(), collection);
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                document TEXT NOT NULL,
                file_path TEXT NOT NULL,
                git_branch TEXT NOT NULL,
                git_commit TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_branch ON chunks(collection, git_branch, git_commit)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(collection, file_path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// `WHERE` clause for `filter`; the first placeholder is the collection.
    fn where_clause(filter: &MetadataFilter) -> String {
        let mut sql = String::from("WHERE collection = ?");
        for (key, _) in filter.conditions() {
            sql.push_str(&format!(" AND {} = ?", key));
        }
        sql
    }
}

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`]. Trailing bytes that do not form a full
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let mut sql = format!(
            "SELECT id, metadata_json FROM chunks {} ORDER BY id",
            Self::where_clause(filter)
        );
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let conditions = filter.conditions();
        let mut query = sqlx::query(&sql).bind(&self.collection);
        for (_, value) in &conditions {
            query = query.bind(*value);
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<StoredRecord> {
                let id: String = row.get("id");
                let json: String = row.get("metadata_json");
                let metadata: ChunkMetadata = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt metadata for chunk {}", id))?;
                Ok(StoredRecord { id, metadata })
            })
            .collect()
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for r in records {
            let metadata_json = serde_json::to_string(&r.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (collection, id, document, file_path, git_branch,
                                    git_commit, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    file_path = excluded.file_path,
                    git_branch = excluded.git_branch,
                    git_commit = excluded.git_commit,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&self.collection)
            .bind(&r.id)
            .bind(&r.document)
            .bind(&r.metadata.file_path)
            .bind(&r.metadata.branch_name)
            .bind(&r.metadata.commit_hash)
            .bind(&metadata_json)
            .bind(vec_to_blob(&r.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<()> {
        match target {
            DeleteTarget::Ids(ids) => {
                let mut tx = self.pool.begin().await?;
                for id in ids {
                    sqlx::query("DELETE FROM chunks WHERE collection = ? AND id = ?")
                        .bind(&self.collection)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
            }
            DeleteTarget::Filter(filter) => {
                let sql = format!("DELETE FROM chunks {}", Self::where_clause(filter));
                let conditions = filter.conditions();
                let mut query = sqlx::query(&sql).bind(&self.collection);
                for (_, value) in &conditions {
                    query = query.bind(*value);
                }
                query.execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, branch: &str, commit: &str, path: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document: format!("text {}", id),
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                start_line: 1,
                end_line: 3,
                branch_name: branch.to_string(),
                commit_hash: commit.to_string(),
                mtime: 42,
                ..Default::default()
            },
            embedding: vec![0.5, -1.25, 3.0],
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/index.db");
        {
            let store = SqliteStore::open(&path, "codebase").await.unwrap();
            store
                .upsert(&[record("a", "main", "c1", "a.go"), record("b", "main", "c1", "b.go")])
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path, "codebase").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let got = store.get(&MetadataFilter::all(), None).await.unwrap();
        assert_eq!(got[0].id, "a");
        assert_eq!(got[0].metadata.mtime, 42);
        assert_eq!(got[0].metadata.end_line, 3);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.db");
        let one = SqliteStore::open(&path, "one").await.unwrap();
        let two = SqliteStore::open(&path, "two").await.unwrap();
        one.upsert(&[record("a", "main", "c1", "a.go")]).await.unwrap();
        assert_eq!(one.count().await.unwrap(), 1);
        assert_eq!(two.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_conflict_updates() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("i.db"), "c").await.unwrap();
        store.upsert(&[record("a", "main", "c1", "a.go")]).await.unwrap();
        store.upsert(&[record("a", "main", "c2", "a.go")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let got = store
            .get(&MetadataFilter::branch("main").with_commit("c2"), None)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn test_filtered_get_limit_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("i.db"), "c").await.unwrap();
        store
            .upsert(&[
                record("1", "main", "c1", "a.go"),
                record("2", "main", "c1", "b.go"),
                record("3", "dev", "c9", "a.go"),
            ])
            .await
            .unwrap();

        let limited = store.get(&MetadataFilter::branch("main"), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        store
            .delete(&DeleteTarget::Filter(MetadataFilter::all().with_file_path("a.go")))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete(&DeleteTarget::Ids(vec!["2".to_string()])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
