//! Embedding generation: provider abstraction, a rate-limited retrying
//! client, and vector utilities.
//!
//! The [`EmbeddingProvider`] trait is the seam tests substitute fakes at; the
//! shipped implementation is [`GeminiEmbedder`], which calls the Gemini
//! `embedContent` endpoint one text per request.
//!
//! [`EmbeddingClient`] wraps a provider with the constraints the provider
//! imposes on us:
//!
//! - at most `max_concurrency` calls in flight at once,
//! - at least `min_interval_ms` between call starts,
//! - exponential backoff retry for transient failures, immediate failure
//!   for auth/validation errors ([`ProviderError::is_retryable`]).
//!
//! Batch embedding is all-or-nothing: [`EmbeddingClient::embed_batch`]
//! either returns one vector per input text, in order, or fails with a
//! [`BatchEmbedError`] naming every text that could not be embedded. A
//! partial batch is never returned. Ingestion persists chunk batches
//! write-once, and search has no use for a half-embedded query set.
//!
//! Also here: the little-endian `f32` BLOB codec used for SQLite storage and
//! [`cosine_similarity`], the only comparison defined over vectors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::config::EmbeddingConfig;
use crate::provider::{ProviderError, RetryPolicy};

/// An embedding backend: one text in, one fixed-dimension vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"embedding-001"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality the model produces.
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Embedding provider backed by the Gemini `embedContent` API.
///
/// Requires the `GEMINI_API_KEY` environment variable.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dims,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
            self.model
        );
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] }
        });

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        parse_embed_response(&json)
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::Malformed("missing embedding.values".to_string()))?;

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// A batch that could not be fully embedded: every failed input index with
/// its reason.
#[derive(Debug)]
pub struct BatchEmbedError {
    pub total: usize,
    pub failures: Vec<(usize, ProviderError)>,
}

impl std::fmt::Display for BatchEmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} texts failed to embed:",
            self.failures.len(),
            self.total
        )?;
        for (idx, err) in &self.failures {
            write!(f, " [{}] {};", idx, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchEmbedError {}

/// Rate-limited, retrying front door to an [`EmbeddingProvider`].
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    slots: Semaphore,
    pacer: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
            slots: Semaphore::new(config.max_concurrency.max(1)),
            pacer: Mutex::new(None),
            min_interval: Duration::from_millis(config.min_interval_ms),
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed a single text under the client's concurrency, spacing, and
    /// retry limits.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ProviderError::Network("embedding limiter closed".to_string()))?;

        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
            self.pace().await;

            match self.provider.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embedding attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Network("embedding failed after retries".to_string())))
    }

    /// Embed every text, in input order, or fail the whole batch.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BatchEmbedError> {
        let outcomes = join_all(texts.iter().map(|text| self.embed_one(text))).await;

        let mut vectors = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (idx, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(vector) => vectors.push(vector),
                Err(e) => failures.push((idx, e)),
            }
        }

        if !failures.is_empty() {
            return Err(BatchEmbedError {
                total: texts.len(),
                failures,
            });
        }
        Ok(vectors)
    }

    /// Enforce the minimum spacing between call starts. Waiters queue on the
    /// pacer lock, so starts are serialized `min_interval` apart even when
    /// several slots are free.
    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.pacer.lock().await;
        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            let now = Instant::now();
            if next_allowed > now {
                tokio::time::sleep(next_allowed - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Encode a vector as a BLOB of little-endian `f32` bytes for SQLite.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for mismatched lengths, empty vectors, or zero-magnitude
/// vectors; never divides by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
