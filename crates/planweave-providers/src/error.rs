//! Error types for the providers crate

use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when interacting with model providers
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Authentication failed (never includes key details)
    #[error("Authentication failed")]
    Auth,

    /// Rate limited by provider
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Prompt does not fit in the model's context window
    #[error("Context too large for model")]
    ContextTooLarge,

    /// Network error occurred
    #[error("Network error: {0}")]
    Network(String),

    /// Provider sent a response that violates the chat-completion protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Generic provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration error (missing API key, bad base URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Two catalog entries share a model name
    #[error("Duplicate model name in catalog: {0}")]
    DuplicateModel(String),

    /// Model name not present in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Model does not satisfy the capability set a role requires
    #[error("Model {model} cannot serve role {role}")]
    RoleUnsatisfied { role: String, model: String },
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Network("request timeout".to_string())
        } else if err.is_connect() {
            ProviderError::Network(err.to_string())
        } else {
            ProviderError::Provider(err.to_string())
        }
    }
}
