//! Daemon configuration
//!
//! One section per component, each with defaults that match the documented
//! operating points (30s poll, 1h task timeout, 4h idea budget, 1h stale
//! threshold, 6h distillation period). Durations are humantime strings in
//! the file ("30s", "4h").

mod loader;

pub use loader::{DEFAULT_CONFIG_FILE, default_config_path, load_config};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult};

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub coordinator: CoordinatorConfig,
    pub learning: LearningConfig,
    pub synthesis: SynthesisConfig,
    pub logging: LoggingConfig,
}

impl DroverConfig {
    /// Reject configurations that cannot produce a working daemon.
    pub fn validate(&self) -> DroverResult<()> {
        if self.store.backend == StoreBackend::Http && self.store.base_url.is_none() {
            return Err(DroverError::config(
                "store.backend = \"http\" requires store.base_url",
            ));
        }
        if self.learning.min_batch_size == 0 {
            return Err(DroverError::config("learning.min_batch_size must be >= 1"));
        }
        if self.learning.max_selected_rules == 0 {
            return Err(DroverError::config(
                "learning.max_selected_rules must be >= 1",
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(DroverError::config("agent.command must not be empty"));
        }
        Ok(())
    }
}

/// Which task-store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store. Useful for local runs and tests; state is lost on
    /// restart.
    #[default]
    Memory,
    /// JSON-over-HTTP client against a shared store service.
    Http,
}

/// Shared task store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token. Secrets never live in
    /// the config file.
    pub auth_token_env: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            base_url: None,
            auth_token_env: "DROVER_STORE_TOKEN".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// External execution agent subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command launched for each execution. Receives the instruction payload
    /// on stdin.
    pub command: String,
    pub args: Vec<String>,
    /// Budget for standard task executions.
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,
    /// Budget for one leg of an idea workflow.
    #[serde(with = "humantime_serde")]
    pub idea_timeout: Duration,
    /// Capture cap per output stream; the tail is kept.
    pub max_output_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            task_timeout: Duration::from_secs(60 * 60),
            idea_timeout: Duration::from_secs(4 * 60 * 60),
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Task queue coordinator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long an in-progress claim may sit before recovery resets it.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    #[serde(with = "humantime_serde")]
    pub stale_scan_interval: Duration,
    /// Stored error messages are truncated to this many characters.
    pub error_message_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60 * 60),
            stale_scan_interval: Duration::from_secs(10 * 60),
            error_message_limit: 1_000,
        }
    }
}

/// Learning pipeline: episode recorder, distillation engine, rule selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    #[serde(with = "humantime_serde")]
    pub recorder_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub distill_interval: Duration,
    /// Minimum undistilled episodes before a distillation pass runs.
    pub min_batch_size: usize,
    /// Rule cap per task, bounding prompt size.
    pub max_selected_rules: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            recorder_interval: Duration::from_secs(5 * 60),
            distill_interval: Duration::from_secs(6 * 60 * 60),
            min_batch_size: 3,
            max_selected_rules: 15,
        }
    }
}

/// Language-model synthesis calls (episode capture and rule distillation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Override the provider endpoint; defaults to the public API.
    pub base_url: Option<String>,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 2_048,
            temperature: 0.2,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Structured logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` still takes precedence.
    pub level: String,
    pub format: LogFormat,
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            show_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_operating_points() {
        let config = DroverConfig::default();
        assert_eq!(config.coordinator.poll_interval, Duration::from_secs(30));
        assert_eq!(config.coordinator.stale_after, Duration::from_secs(3600));
        assert_eq!(config.agent.task_timeout, Duration::from_secs(3600));
        assert_eq!(config.agent.idea_timeout, Duration::from_secs(4 * 3600));
        assert_eq!(config.learning.min_batch_size, 3);
        assert_eq!(config.learning.max_selected_rules, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_parse_from_humantime_strings() {
        let config: DroverConfig = toml::from_str(
            r#"
            [coordinator]
            poll_interval = "45s"
            stale_after = "90m"

            [agent]
            idea_timeout = "2h"
            "#,
        )
        .unwrap();
        assert_eq!(config.coordinator.poll_interval, Duration::from_secs(45));
        assert_eq!(config.coordinator.stale_after, Duration::from_secs(90 * 60));
        assert_eq!(config.agent.idea_timeout, Duration::from_secs(2 * 3600));
        // Untouched sections keep their defaults.
        assert_eq!(config.learning.min_batch_size, 3);
    }

    #[test]
    fn test_http_backend_requires_base_url() {
        let config: DroverConfig = toml::from_str("[store]\nbackend = \"http\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: DroverConfig =
            toml::from_str("[store]\nbackend = \"http\"\nbase_url = \"http://localhost:7700\"\n")
                .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config: DroverConfig = toml::from_str("[learning]\nmin_batch_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
