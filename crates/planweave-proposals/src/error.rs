//! Error types for the proposal pipeline

use chrono::{DateTime, Utc};
use thiserror::Error;

use planweave_providers::ProviderError;
use planweave_repo::RepoError;

/// Result type for proposal operations
pub type ProposalResult<T> = Result<T, ProposalError>;

/// Errors that can terminate a proposal
#[derive(Debug, Error, Clone)]
pub enum ProposalError {
    /// Prompt plus context exceed the budget before any conversation is added
    #[error("Token budget exceeded before conversation: {total} > {max}")]
    BudgetBeforeConversation { total: usize, max: usize },

    /// No conversation summary shrinks the request under the budget
    #[error("Token budget exceeded even after summarizing conversation")]
    BudgetAfterSummary,

    /// Provider rejected the request because the prompt was too long
    #[error("Token budget exceeded: provider rejected the request as too long")]
    BudgetProviderRejected,

    /// A summary references a timestamp absent from the conversation
    #[error("Summary timestamp {0} not found in conversation")]
    SummaryMismatch(DateTime<Utc>),

    /// Provider was silent past the chunk watchdog
    #[error("Stream timeout due to inactivity")]
    StreamTimeout,

    /// Provider violated the streaming protocol
    #[error("Stream protocol violation: {0}")]
    Protocol(String),

    /// The proposal was cancelled
    #[error("Proposal cancelled")]
    Cancelled,

    /// Building a file failed validation
    #[error("Build failed for {path}: {message}")]
    Build { path: String, message: String },

    /// A builder task panicked
    #[error("Server panic: {0}")]
    Panic(String),

    /// Filesystem error while committing built files
    #[error("IO error: {0}")]
    Io(String),

    /// Serializing a stream frame failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the model provider
    #[error(transparent)]
    Provider(ProviderError),

    /// Error from the plan repository layer
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<ProviderError> for ProposalError {
    fn from(err: ProviderError) -> Self {
        match err {
            // a too-long rejection is part of the budget taxonomy, not a
            // generic provider failure
            ProviderError::ContextTooLarge => ProposalError::BudgetProviderRejected,
            other => ProposalError::Provider(other),
        }
    }
}

impl From<std::io::Error> for ProposalError {
    fn from(err: std::io::Error) -> Self {
        ProposalError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProposalError {
    fn from(err: serde_json::Error) -> Self {
        ProposalError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_too_large_maps_to_budget_error() {
        let err = ProposalError::from(ProviderError::ContextTooLarge);
        assert!(matches!(err, ProposalError::BudgetProviderRejected));
        assert!(err.to_string().contains("budget"));
    }

    #[test]
    fn other_provider_errors_stay_provider_errors() {
        let err = ProposalError::from(ProviderError::Auth);
        assert!(matches!(err, ProposalError::Provider(ProviderError::Auth)));
    }
}
