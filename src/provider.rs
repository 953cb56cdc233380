//! Shared plumbing for the external Gemini services: the error taxonomy the
//! retry loops classify against, and the backoff policy they share.
//!
//! Both the embedding client and the chat model retry transient failures
//! (rate limits, server errors, network drops) with exponential backoff and
//! fail immediately on anything else: authentication rejections, request
//! validation errors, and response bodies that do not parse. Keeping the
//! classifier on the error type itself keeps the policy testable without a
//! network.

use std::time::Duration;
use thiserror::Error;

/// A failed call to an external provider, classified for retry decisions.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("invalid request {status}: {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed. Auth and validation errors
    /// will fail the same way every time; malformed bodies already cost a
    /// successful round-trip.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Server { .. }
                | ProviderError::Network(_)
        )
    }

    /// Classify a non-success HTTP status plus response body.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => ProviderError::RateLimited(message),
            401 | 403 => ProviderError::Auth(message),
            s if s >= 500 => ProviderError::Server { status: s, message },
            s => ProviderError::InvalidRequest { status: s, message },
        }
    }
}

/// Retry budget and backoff curve for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means exactly one attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry after that.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry `attempt` (1-based). The exponent is capped so
    /// a large budget cannot overflow into multi-hour sleeps.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }
}
