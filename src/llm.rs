//! Chat model access for grounded answer generation.
//!
//! [`ChatModel`] is the seam the answerer depends on; the shipped
//! implementation is [`GeminiChat`], calling the Gemini `generateContent`
//! endpoint with JSON output requested. Retry classification is shared with
//! the embedding client via [`ProviderError`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::provider::{ProviderError, RetryPolicy};

/// A chat-completion backend that can answer a prompt with strict JSON.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier (e.g. `"gemini-2.0-flash"`).
    fn model_name(&self) -> &str;
    /// Generate a reply to `prompt`, requesting structured JSON output.
    /// Returns the raw reply text; parsing is the caller's concern.
    async fn generate_json(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Chat model backed by the Gemini `generateContent` API.
///
/// Deterministic settings for answer shaping: temperature 0 and a JSON
/// response MIME type. Requires the `GEMINI_API_KEY` environment variable.
pub struct GeminiChat {
    client: reqwest::Client,
    model: String,
    api_key: String,
    max_output_tokens: u32,
    retry: RetryPolicy,
}

impl GeminiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
        })
    }

    async fn request(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json"
            }
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
        parse_generate_response(&json)
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_json(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }

            match self.request(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "chat model attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Network("chat request failed after retries".to_string())))
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    json.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| ProviderError::Malformed("missing candidates[0].content.parts[0].text".to_string()))
}

/// Instantiate the chat model named in the configuration.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
