//! In-memory [`VectorStore`] for tests and `memory:` runs.
//!
//! Entries live in a `BTreeMap` keyed by id behind `std::sync::RwLock`, so
//! reads come back in id order and nothing survives the process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ChunkMetadata;

use super::{ChunkRecord, DeleteTarget, MetadataFilter, StoredRecord, VectorStore};

struct StoredEntry {
    #[allow(dead_code)]
    document: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
}

pub struct InMemoryStore {
    collection: String,
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stored vector for `id`, if any.
    pub fn embedding(&self, id: &str) -> Option<Vec<f32>> {
        let entries = self.entries.read().unwrap();
        entries.get(id).map(|e| e.embedding.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .iter()
            .filter(|(_, e)| filter.matches(&e.metadata))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, e)| StoredRecord {
                id: id.clone(),
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        for r in records {
            entries.insert(
                r.id.clone(),
                StoredEntry {
                    document: r.document.clone(),
                    metadata: r.metadata.clone(),
                    embedding: r.embedding.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        match target {
            DeleteTarget::Ids(ids) => {
                for id in ids {
                    entries.remove(id);
                }
            }
            DeleteTarget::Filter(filter) => {
                entries.retain(|_, e| !filter.matches(&e.metadata));
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }
}
