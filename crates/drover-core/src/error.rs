//! Error types for Drover

use thiserror::Error;

use crate::agent::AgentError;
use crate::llm::SynthesisError;
use crate::store::StoreError;

/// Result type alias for Drover operations
pub type DroverResult<T> = Result<T, DroverError>;

/// Main error type for Drover
///
/// Nothing in the core treats these as fatal: poll loops log and continue,
/// and per-record failures resolve to a status on the record itself.
#[derive(Error, Debug, Clone)]
pub enum DroverError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Task store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Execution agent errors
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Synthesis call errors
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Structured output could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Execution timeout
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Work was cancelled by the user
    #[error("Cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl DroverError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new timeout error
    pub const fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<std::io::Error> for DroverError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for DroverError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DroverError::config("missing store URL");
        assert_eq!(error.to_string(), "Configuration error: missing store URL");

        let error = DroverError::timeout(3600);
        assert_eq!(error.to_string(), "Execution timed out after 3600 seconds");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: DroverError = io_error.into();
        assert!(matches!(error, DroverError::Io(_)));
    }
}
