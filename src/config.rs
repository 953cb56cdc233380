use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    3000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum simultaneous in-flight embedding calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Minimum spacing between call starts, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_embed_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_embedding_model() -> String {
    "embedding-001".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_embed_timeout_secs() -> u64 {
    15
}
fn default_max_concurrency() -> usize {
    4
}
fn default_min_interval_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_llm_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_max_output_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Guardrail against unbounded ranking work per request.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Concurrent ingestion job slots.
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Delivery attempts the queue grants a job before abandoning it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_worker_concurrency() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap must be < chunking.max_chars");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_top_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.max_top_k must be >= retrieval.top_k");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.max_concurrency == 0 {
        anyhow::bail!("embedding.max_concurrency must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be gemini.", other),
    }
    match config.llm.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be gemini.", other),
    }

    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be >= 1");
    }
    if config.worker.max_attempts == 0 {
        anyhow::bail!("worker.max_attempts must be >= 1");
    }

    Ok(())
}
