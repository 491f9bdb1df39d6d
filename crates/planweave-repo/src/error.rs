//! Error types for plan repository operations

use thiserror::Error;

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur while locking or mutating a plan repository
#[derive(Debug, Error, Clone)]
pub enum RepoError {
    /// Lock could not be acquired before retries/deadline ran out
    #[error("Repo lock unavailable for plan {plan_id}")]
    LockUnavailable { plan_id: String },

    /// Lock is held in a conflicting scope
    #[error("Repo lock conflict for plan {plan_id}")]
    LockConflict { plan_id: String },

    /// Git operation failed
    #[error("Git error: {0}")]
    Git(String),

    /// Rollback of uncommitted changes failed
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// A panic was recovered inside the locked critical section
    #[error("Server panic: {0}")]
    Panic(String),

    /// The critical section task was cancelled before completing
    #[error("Critical section cancelled")]
    Cancelled,
}

impl From<git2::Error> for RepoError {
    fn from(err: git2::Error) -> Self {
        RepoError::Git(err.message().to_string())
    }
}
