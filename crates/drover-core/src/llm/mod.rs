//! Language-model synthesis calls
//!
//! The learning pipeline makes two kinds of synthesis calls: episode
//! capture (one rated task at a time) and rule distillation (one batch).
//! Both go through [`SynthesisClient`], and both treat the model as
//! unreliable: empty, malformed, and failed responses are handled by the
//! callers without crashing their poll loops.

pub mod anthropic;

pub use anthropic::AnthropicClient;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a synthesis exchange
#[derive(Error, Debug, Clone)]
pub enum SynthesisError {
    /// The request never produced an HTTP response
    #[error("Synthesis request failed: {0}")]
    Request(String),

    /// The API answered with a non-success status
    #[error("Synthesis API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The API answered successfully but with no usable text
    #[error("Synthesis response was empty")]
    Empty,
}

impl SynthesisError {
    /// Transient failures worth retrying: throttling, gateway errors, and
    /// network flakes. Client-side errors (4xx other than 429) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(message) => {
                let message = message.to_lowercase();
                message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("connection")
                    || message.contains("network")
            }
            Self::Api { status, message } => {
                matches!(status, 429 | 502 | 503 | 504)
                    || message.to_lowercase().contains("overloaded")
            }
            Self::Empty => false,
        }
    }
}

/// One request/response exchange with a language model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Send one prompt and return the raw text of the reply.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, SynthesisError>;
}
