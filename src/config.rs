use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an Ollama-compatible embedding service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Fixed vector dimension for the whole store. Must match the model's
    /// output size; changing it invalidates every stored embedding.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Texts per embedding call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Generous: the first call can trigger model loading, which takes
    /// minutes on large models. Timeouts are not retried.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model() -> String {
    "bge-m3".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    500
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// RRF smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Independent trust coefficients; they need not sum to 1.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f64,
    /// Over-fetch ceiling per sub-query before fusion. Kept well above
    /// top_k so the two candidate lists overlap enough to re-rank.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            vector_weight: default_vector_weight(),
            fts_weight: default_fts_weight(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_fts_weight() -> f64 {
    0.3
}
fn default_candidate_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_tokens == 0 {
        anyhow::bail!("chunking.chunk_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.chunk_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.chunk_tokens");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.search.top_k == 0 {
        anyhow::bail!("search.top_k must be >= 1");
    }
    if config.search.candidate_limit < config.search.top_k {
        anyhow::bail!("search.candidate_limit must be >= search.top_k");
    }
    if config.search.vector_weight < 0.0 || config.search.fts_weight < 0.0 {
        anyhow::bail!("search weights must be non-negative");
    }
    Ok(())
}

impl Config {
    /// In-memory defaults around an explicit database path. Used by tests
    /// and by commands that can run before a config file exists.
    pub fn with_db_path(path: PathBuf) -> Self {
        Self {
            db: DbConfig { path },
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}
