//! Error types for trapforge operations.
//!
//! Stage-level failures (rejected model output, failed validation, exhausted
//! attempts) are modelled as data on the run result, not as errors. The types
//! here cover the collaborators around the workflow:
//! - LLM API interactions
//! - Run persistence
//! - Configuration loading

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set LITELLM_API_KEY or OPENROUTER_API_KEY")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model returned no choices")]
    EmptyResponse,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised by run persistence backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run '{0}' is already finalized")]
    RunFinalized(String),
}

/// Errors raised while loading or validating pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid bounds for {name}: min ({min}) must be <= max ({max})")]
    InvalidBounds { name: String, min: usize, max: usize },

    #[error("{0} must be at least 1")]
    ZeroLimit(String),
}
