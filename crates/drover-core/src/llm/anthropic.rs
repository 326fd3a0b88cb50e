//! Anthropic Messages API client
//!
//! Production [`SynthesisClient`] implementation. Failed calls retry with
//! exponential backoff plus jitter; only transient failures
//! (see [`SynthesisError::is_retryable`]) are retried.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use crate::config::SynthesisConfig;
use crate::error::{DroverError, DroverResult};
use crate::llm::{SynthesisClient, SynthesisError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn messages_url(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL);
    format!("{}/v1/messages", base.trim_end_matches('/'))
}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    config: SynthesisConfig,
    api_key: String,
}

impl AnthropicClient {
    /// Build a client from configuration. The API key is read from the
    /// environment variable named in `config.api_key_env`.
    pub fn new(config: SynthesisConfig) -> DroverResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            DroverError::config(format!(
                "synthesis API key not set; export {}",
                config.api_key_env
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| DroverError::config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    async fn send_once(&self, system: &str, prompt: &str) -> Result<String, SynthesisError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(messages_url(self.config.base_url.as_deref()))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|error| SynthesisError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let snippet: String = message.chars().take(300).collect();
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message: snippet,
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|error| SynthesisError::Request(format!("invalid response body: {error}")))?;

        let text = value["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SynthesisError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl SynthesisClient for AnthropicClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, SynthesisError> {
        let max_retries = self.config.max_retries;
        let mut last_error = SynthesisError::Empty;

        for attempt in 0..=max_retries {
            match self.send_once(system, prompt).await {
                Ok(text) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "synthesis call succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt == max_retries {
                        return Err(error);
                    }
                    let base_delay_secs = 2_u64.pow(attempt);
                    let jitter_ms = rand::thread_rng().gen_range(0..=(base_delay_secs * 500));
                    let delay =
                        Duration::from_secs(base_delay_secs) + Duration::from_millis(jitter_ms);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = max_retries + 1,
                        delay_secs = delay.as_secs_f64(),
                        %error,
                        "synthesis call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}
