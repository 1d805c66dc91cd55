//! Configuration loading and validation.
//!
//! ragline is configured through a single TOML file (default
//! `./config/ragline.toml`). Every section has defaults, so a file that
//! only names the endpoints is enough to run:
//!
//! ```toml
//! [vector]
//! dimension = 1536
//! metric = "cosine"
//!
//! [embedding]
//! url = "http://localhost:8080"
//!
//! [index]
//! url = "http://localhost:9200"
//! name = "rag-documents-dev"
//! ```
//!
//! The `[vector]` section is the single source of the embedding
//! dimensionality and similarity metric; both the embedding client and the
//! index read it. An `[embedding] dimension` that disagrees with it is
//! rejected at load time.
//!
//! Credentials are never read from the file. When an `[aws]` section is
//! present, provider and index requests are SigV4-signed with
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ragline_core::models::{SimilarityMetric, VectorSpec};
use ragline_core::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aws: Option<AwsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: SimilarityMetric,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            metric: default_metric(),
        }
    }
}

fn default_dimension() -> usize {
    1536
}
fn default_metric() -> SimilarityMetric {
    SimilarityMetric::Cosine
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Characters per chunk; zero or negative means the built-in default.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_max_chunk_size() -> i64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the model runtime. Derived from `[aws] region` when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Model used once the primary has been rejected. Empty disables fallback.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: Option<String>,
    /// Expected output length of the model, checked against `[vector]`.
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_embedding_model(),
            fallback_model: default_fallback_model(),
            dimension: None,
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "amazon.titan-embed-text-v2:0".to_string()
}
fn default_fallback_model() -> Option<String> {
    Some("amazon.titan-embed-text-v1".to_string())
}
fn default_concurrency() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop_sequences: default_stop_sequences(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "amazon.titan-text-express-v1".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_stop_sequences() -> Vec<String> {
    vec!["User:".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_hnsw_m")]
    pub m: u32,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: u32,
    #[serde(default = "default_ef_search")]
    pub ef_search: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            name: default_index_name(),
            vector_field: default_vector_field(),
            engine: default_engine(),
            m: default_hnsw_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "rag-documents-dev".to_string()
}
fn default_vector_field() -> String {
    "embedding".to_string()
}
fn default_engine() -> String {
    "nmslib".to_string()
}
fn default_hnsw_m() -> u32 {
    16
}
fn default_ef_construction() -> u32 {
    512
}
fn default_ef_search() -> u32 {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

fn default_max_failures() -> u32 {
    5
}
fn default_reset_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_query_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            deadline_secs: default_query_deadline_secs(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    20
}
fn default_query_deadline_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_ingest_deadline_secs(),
        }
    }
}

fn default_ingest_deadline_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./data/documents")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    pub region: String,
}

impl Config {
    /// The shared vector spec, after checking the embedding model agrees with it.
    pub fn vector_spec(&self) -> Result<VectorSpec, RagError> {
        if let Some(dimension) = self.embedding.dimension {
            if dimension != self.vector.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.vector.dimension,
                    actual: dimension,
                });
            }
        }
        Ok(VectorSpec {
            dimension: self.vector.dimension,
            metric: self.vector.metric,
        })
    }

    pub fn region(&self) -> Option<&str> {
        self.aws.as_ref().map(|a| a.region.as_str())
    }

    /// Model runtime base URL for embeddings.
    pub fn embedding_url(&self) -> Result<String> {
        runtime_url(self.embedding.url.as_deref(), self.region(), "embedding")
    }

    /// Model runtime base URL for generation.
    pub fn generation_url(&self) -> Result<String> {
        runtime_url(self.generation.url.as_deref(), self.region(), "generation")
    }
}

fn runtime_url(explicit: Option<&str>, region: Option<&str>, section: &str) -> Result<String> {
    match (explicit, region) {
        (Some(url), _) => Ok(url.trim_end_matches('/').to_string()),
        (None, Some(region)) => Ok(format!("https://bedrock-runtime.{}.amazonaws.com", region)),
        (None, None) => bail!("{}.url must be set when no [aws] region is configured", section),
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.vector.dimension == 0 {
        bail!("vector.dimension must be > 0");
    }
    config
        .vector_spec()
        .with_context(|| "embedding.dimension disagrees with vector.dimension")?;

    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }

    if config.retry.multiplier < 1.0 {
        bail!("retry.multiplier must be >= 1.0");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    if config.breaker.max_failures == 0 {
        bail!("breaker.max_failures must be >= 1");
    }

    if config.query.default_k == 0 || config.query.max_k == 0 {
        bail!("query.default_k and query.max_k must be >= 1");
    }
    if config.query.default_k > config.query.max_k {
        bail!("query.default_k must not exceed query.max_k");
    }

    if !(0.0..=1.0).contains(&config.generation.top_p) {
        bail!("generation.top_p must be in [0.0, 1.0]");
    }

    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }

    Ok(config)
}
