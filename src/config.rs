//! Configuration file parsing and validation.
//!
//! Every section and field is optional; a missing file section falls back to
//! the same defaults the CLI documents. Command-line flags are applied on top
//! of the loaded values by the binary, then [`Config::validate`] runs again.
//!
//! ```toml
//! [store]
//! location = "http://localhost:8000"
//! collection = "codebase"
//!
//! [embedding]
//! provider = "tei"
//! url = "http://localhost:8081"
//!
//! [indexing]
//! batch_size = 128
//! workers = 8
//!
//! [discovery]
//! exclude_globs = ["proto/generated/**"]
//! ```

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::Path;

/// Embedding providers understood by [`crate::embedding::create_embedder`].
pub const KNOWN_PROVIDERS: &[&str] = &["tei", "ollama", "openai", "hash"];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `http(s)://host:port` for Chroma, `sqlite:<path>`, or `memory:`.
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            collection: default_collection(),
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_location() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "codebase".to_string()
}
fn default_store_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// L2-normalize vectors client-side before they are stored.
    #[serde(default)]
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            dims: None,
            timeout_secs: default_embed_timeout(),
            max_retries: default_max_retries(),
            normalize: false,
        }
    }
}

fn default_provider() -> String {
    "tei".to_string()
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}

impl EmbeddingConfig {
    /// Model label recorded in stats, falling back to the provider default.
    pub fn model_or_default(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            "ollama" => "nomic-embed-text".to_string(),
            "hash" => "feature-hash".to_string(),
            _ => "all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Chunks accumulated before a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// When false, change detection is bypassed and every file is chunked.
    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_file_size_mb: default_max_file_size_mb(),
            incremental: true,
        }
    }
}

impl IndexingConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_batch_size() -> usize {
    128
}
fn default_workers() -> usize {
    8
}
fn default_max_file_size_mb() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_target_size() -> usize {
    2000
}
fn default_overlap() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ignore_file: default_ignore_file(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_ignore_file() -> String {
    ".gitignore".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.store.collection.trim().is_empty() {
            bail!("store.collection must not be empty");
        }

        if self.indexing.batch_size == 0 {
            bail!("indexing.batch_size must be > 0");
        }
        if self.indexing.workers == 0 {
            bail!("indexing.workers must be > 0");
        }
        if self.indexing.max_file_size_mb == 0 {
            bail!("indexing.max_file_size_mb must be > 0");
        }

        if self.chunking.target_size == 0 {
            bail!("chunking.target_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.target_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.target_size ({})",
                self.chunking.overlap,
                self.chunking.target_size
            );
        }

        if !KNOWN_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            bail!(
                "Unknown embedding provider: '{}'. Must be one of: {}",
                self.embedding.provider,
                KNOWN_PROVIDERS.join(", ")
            );
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        for pattern in &self.discovery.exclude_globs {
            Glob::new(pattern)
                .with_context(|| format!("Invalid discovery.exclude_globs entry: {}", pattern))?;
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.store.location, "http://localhost:8000");
        assert_eq!(config.store.collection, "codebase");
        assert_eq!(config.indexing.batch_size, 128);
        assert_eq!(config.indexing.workers, 8);
        assert_eq!(config.indexing.max_file_bytes(), 10 * 1024 * 1024);
        assert!(config.indexing.incremental);
        assert_eq!(config.chunking.target_size, 2000);
        assert_eq!(config.chunking.overlap, 400);
        assert_eq!(config.discovery.ignore_file, ".gitignore");
        assert_eq!(config.embedding.provider, "tei");
    }

    #[test]
    fn test_partial_sections() {
        let f = write_config(
            r#"
[store]
location = "sqlite:/tmp/index.db"

[indexing]
workers = 2
incremental = false

[discovery]
exclude_globs = ["vendor/**"]
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.store.location, "sqlite:/tmp/index.db");
        assert_eq!(config.store.collection, "codebase");
        assert_eq!(config.indexing.workers, 2);
        assert_eq!(config.indexing.batch_size, 128);
        assert!(!config.indexing.incremental);
        assert_eq!(config.discovery.exclude_globs, vec!["vendor/**"]);
    }

    #[test]
    fn test_rejects_overlap_not_below_target() {
        let f = write_config("[chunking]\ntarget_size = 100\noverlap = 100\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let f = write_config("[indexing]\nworkers = 0\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let f = write_config("[embedding]\nprovider = \"magic\"\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_rejects_bad_glob() {
        let f = write_config("[discovery]\nexclude_globs = [\"src/[\"]\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_model_defaults_per_provider() {
        let mut e = EmbeddingConfig::default();
        assert_eq!(e.model_or_default(), "all-MiniLM-L6-v2");
        e.provider = "hash".to_string();
        assert_eq!(e.model_or_default(), "feature-hash");
        e.model = Some("custom".to_string());
        assert_eq!(e.model_or_default(), "custom");
    }
}
