//! Error types for veracity.

use thiserror::Error;

/// Result type alias using veracity's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during detection.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Timeout during a sub-request
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Caller contract violation: required input missing
    #[error("Insufficient input: {0}")]
    InsufficientInput(String),

    /// Loaded fusion model does not match the current feature schema
    #[error("Fusion model schema mismatch: {0}")]
    ModelSchema(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (fusion model persistence)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an insufficient-input error.
    pub fn insufficient_input(message: impl Into<String>) -> Self {
        Self::InsufficientInput(message.into())
    }
}
