//! Embedding providers.
//!
//! The indexer treats embedding as a black box: [`Embedder::embed`] turns a
//! batch of texts into one vector per text, in input order. Providers:
//! - **tei**: a Text Embeddings Inference server (`POST /embed`).
//! - **ollama**: a local Ollama instance (`POST /api/embed`).
//! - **openai**: the OpenAI embeddings API (`OPENAI_API_KEY`).
//! - **hash**: offline feature hashing, for smoke tests and air-gapped runs.
//!
//! # Retry Strategy
//!
//! HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The orchestrator never retries a batch on top of this.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;

const DEFAULT_TEI_URL: &str = "http://localhost:8081";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_HASH_DIMS: usize = 256;

const HEALTH_ATTEMPTS: u32 = 30;
const HEALTH_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in run summaries.
    fn model_name(&self) -> &str;

    /// Embed `texts`, returning exactly one vector per text in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============ Shared HTTP plumbing ============

struct HttpTransport {
    client: reqwest::Client,
    max_retries: u32,
    label: &'static str,
}

impl HttpTransport {
    fn new(config: &EmbeddingConfig, label: &'static str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            label,
        })
    }

    /// POST `body` to `url`, retrying 429/5xx and network errors.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(
                    "{} embedding retry {}/{} in {:?}",
                    self.label,
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("{} API error {}: {}", self.label, status, body_text));
                        continue;
                    }

                    bail!("{} API error {}: {}", self.label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "{} connection error (is the service running at {}?): {}",
                        self.label,
                        url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", self.label)))
    }
}

fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", label))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ TEI ============

/// Text Embeddings Inference server.
pub struct TeiEmbedder {
    transport: HttpTransport,
    url: String,
    model: String,
}

impl TeiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .or_else(|| std::env::var("TEI_URL").ok())
            .unwrap_or_else(|| DEFAULT_TEI_URL.to_string());
        Ok(Self {
            transport: HttpTransport::new(config, "TEI")?,
            url: url.trim_end_matches('/').to_string(),
            model: config.model_or_default(),
        })
    }

    /// Poll `/health` until the server answers, or give up.
    pub async fn wait_until_healthy(&self, attempts: u32, interval: Duration) -> Result<()> {
        let health_url = format!("{}/health", self.url);
        for attempt in 1..=attempts {
            match self.transport.client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => tracing::debug!("TEI health {}: status {}", attempt, resp.status()),
                Err(e) => tracing::debug!("TEI health {}: {}", attempt, e),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        bail!("Embedding service not available at {}", self.url)
    }
}

#[async_trait]
impl Embedder for TeiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "inputs": texts, "truncate": true });
        let json = self
            .transport
            .post_json(&format!("{}/embed", self.url), None, &body)
            .await?;
        parse_tei_response(&json)
    }
}

fn parse_tei_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.as_array()
        .ok_or_else(|| anyhow!("Invalid TEI response: expected an array of vectors"))?
        .iter()
        .map(|v| parse_vector(v, "TEI"))
        .collect()
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    transport: HttpTransport,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            transport: HttpTransport::new(config, "Ollama")?,
            url: url.trim_end_matches('/').to_string(),
            model: config.model_or_default(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = self
            .transport
            .post_json(&format!("{}/api/embed", self.url), None, &body)
            .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|v| parse_vector(v, "Ollama"))
        .collect()
}

// ============ OpenAI ============

/// OpenAI embeddings API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    transport: HttpTransport,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            transport: HttpTransport::new(config, "OpenAI")?,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            model: config.model_or_default(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = self
            .transport
            .post_json(&self.url, Some(&self.api_key), &body)
            .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hash ============

/// Deterministic bag-of-tokens embedder.
///
/// Each alphanumeric token is hashed into one of `dims` buckets with a
/// hash-derived sign. Similar texts land near each other, which is enough
/// for smoke tests; no network or model is involved.
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: "feature-hash".to_string(),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Build the embedder named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"tei"` | [`TeiEmbedder`] (waits for `/health`) |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "tei" => {
            let tei = TeiEmbedder::new(config)?;
            tracing::info!("Connecting to embedding service at {}", tei.url);
            tei.wait_until_healthy(HEALTH_ATTEMPTS, HEALTH_INTERVAL).await?;
            Ok(Arc::new(tei))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
