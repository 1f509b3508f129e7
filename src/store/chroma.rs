//! Chroma [`VectorStore`] over the v2 REST API.
//!
//! All requests go to the default tenant and database. The collection is
//! resolved (or created with cosine distance) once at connect time and then
//! addressed by id.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::ChunkMetadata;

use super::{ChunkRecord, DeleteTarget, MetadataFilter, StoredRecord, VectorStore};

const API_PREFIX: &str = "/api/v2/tenants/default_tenant/databases/default_database";

/// Page size for `get` requests that have no caller limit.
const GET_PAGE_SIZE: usize = 1000;

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Serialize)]
struct GetRequest<'a> {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<serde_json::Value>,
    limit: usize,
    offset: usize,
    include: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    metadatas: Option<Vec<Option<serde_json::Value>>>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<serde_json::Value>,
}

impl ChromaStore {
    /// Connect to `url` (`http://host:port`) and get or create `collection`.
    pub async fn connect(url: &str, collection: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = format!("{}{}", url.trim_end_matches('/'), API_PREFIX);

        let body = serde_json::json!({
            "name": collection,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": true,
        });
        let info: CollectionInfo = send_json(
            client.post(format!("{}/collections", base_url)).json(&body),
        )
        .await
        .with_context(|| format!("Failed to open Chroma collection '{}' at {}", collection, url))?;

        tracing::info!("Using Chroma collection {} ({})", collection, info.id);

        Ok(Self {
            client,
            base_url,
            collection: collection.to_string(),
            collection_id: info.id,
        })
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/collections/{}/{}", self.base_url, self.collection_id, op)
    }
}

/// Translate a filter into a Chroma `where` document.
pub fn where_document(filter: &MetadataFilter) -> Option<serde_json::Value> {
    let clauses: Vec<serde_json::Value> = filter
        .conditions()
        .into_iter()
        .map(|(key, value)| {
            let mut clause = serde_json::Map::new();
            clause.insert(key.to_string(), serde_json::json!({ "$eq": value }));
            serde_json::Value::Object(clause)
        })
        .collect();

    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(serde_json::json!({ "$and": clauses })),
    }
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Chroma API error {}: {}", status, body);
    }
    Ok(response.json().await?)
}

async fn send_unit(request: reqwest::RequestBuilder) -> Result<()> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Chroma API error {}: {}", status, body);
    }
    Ok(())
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn backend(&self) -> &'static str {
        "chroma"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let where_clause = where_document(filter);
        let mut out = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = match limit {
                Some(limit) => (limit - out.len()).min(GET_PAGE_SIZE),
                None => GET_PAGE_SIZE,
            };
            if page == 0 {
                break;
            }

            let request = GetRequest {
                where_clause: where_clause.clone(),
                limit: page,
                offset,
                include: &["metadatas"],
            };
            let response: GetResponse =
                send_json(self.client.post(self.endpoint("get")).json(&request)).await?;

            let returned = response.ids.len();
            let metadatas = response.metadatas.unwrap_or_default();
            for (idx, id) in response.ids.into_iter().enumerate() {
                let metadata = match metadatas.get(idx).cloned().flatten() {
                    Some(value) => serde_json::from_value::<ChunkMetadata>(value)
                        .with_context(|| format!("Unexpected metadata for chunk {}", id))?,
                    None => ChunkMetadata::default(),
                };
                out.push(StoredRecord { id, metadata });
            }

            if returned < page {
                break;
            }
            offset += returned;
        }

        Ok(out)
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let request = UpsertRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records
                .iter()
                .map(|r| serde_json::to_value(&r.metadata))
                .collect::<std::result::Result<_, _>>()?,
        };
        send_unit(self.client.post(self.endpoint("upsert")).json(&request)).await
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<()> {
        let body = match target {
            DeleteTarget::Ids(ids) => {
                if ids.is_empty() {
                    return Ok(());
                }
                serde_json::json!({ "ids": ids })
            }
            DeleteTarget::Filter(filter) => match where_document(filter) {
                Some(w) => serde_json::json!({ "where": w }),
                None => bail!("Refusing to delete an entire Chroma collection with an empty filter"),
            },
        };
        send_unit(self.client.post(self.endpoint("delete")).json(&body)).await
    }

    async fn count(&self) -> Result<usize> {
        send_json(self.client.get(self.endpoint("count"))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_document_shapes() {
        assert_eq!(where_document(&MetadataFilter::all()), None);
        assert_eq!(
            where_document(&MetadataFilter::branch("main")),
            Some(serde_json::json!({"git_branch": {"$eq": "main"}}))
        );
        assert_eq!(
            where_document(&MetadataFilter::branch("main").with_commit("abc")),
            Some(serde_json::json!({
                "$and": [
                    {"git_branch": {"$eq": "main"}},
                    {"git_commit": {"$eq": "abc"}}
                ]
            }))
        );
    }

    #[test]
    fn test_get_response_tolerates_null_metadata() {
        let response: GetResponse = serde_json::from_str(
            r#"{"ids": ["a", "b"], "metadatas": [{"file_path": "x.go", "git_commit": "c1"}, null]}"#,
        )
        .unwrap();
        let metadatas = response.metadatas.unwrap();
        assert!(metadatas[1].is_none());
        let m: ChunkMetadata = serde_json::from_value(metadatas[0].clone().unwrap()).unwrap();
        assert_eq!(m.commit_hash, "c1");
    }
}
