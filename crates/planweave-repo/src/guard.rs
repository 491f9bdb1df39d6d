//! Panic-safe lock guard
//!
//! Wraps a critical section in lock acquisition, rollback-on-error, and
//! unconditional release. The section runs on its own task so a panic is
//! captured as a join error and converted into a normal error result before
//! the rollback branch runs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, warn};

use crate::error::RepoError;
use crate::lock::{LockManager, LockRequest};
use crate::rollback::clear_uncommitted_changes;

/// Run `section` while holding the requested repo lock
///
/// On any error — including a recovered panic — uncommitted changes in
/// `repo_dir` are cleared before the lock is released. Rollback failure is
/// logged and never masks the original error. The lock is released on every
/// path.
pub async fn with_repo_lock<T, E, F>(
    manager: &LockManager,
    request: LockRequest,
    caller_deadline: Option<Duration>,
    repo_dir: &Path,
    section: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<RepoError> + Send + 'static,
{
    let lock_id = manager.acquire(request, caller_deadline).await?;

    let result = match tokio::spawn(section).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            error!("recovered panic in locked section: {message}");
            Err(E::from(RepoError::Panic(message)))
        }
        Err(_) => Err(E::from(RepoError::Cancelled)),
    };

    if result.is_err() {
        rollback_best_effort(repo_dir);
    }

    manager.release(lock_id);
    result
}

/// Clear uncommitted changes, logging failure instead of propagating it
pub fn rollback_best_effort(repo_dir: &Path) {
    if let Err(err) = clear_uncommitted_changes(repo_dir) {
        warn!(repo = %repo_dir.display(), "rollback failed: {err}");
    }
}

/// Owned variant for callers that need `repo_dir` inside a spawned task
pub async fn with_repo_lock_owned<T, E, F>(
    manager: LockManager,
    request: LockRequest,
    caller_deadline: Option<Duration>,
    repo_dir: PathBuf,
    section: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<RepoError> + Send + 'static,
{
    with_repo_lock(&manager, request, caller_deadline, &repo_dir, section).await
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
