//! Per-plan repository locks
//!
//! Read locks coexist; a write lock is exclusive. Acquisition retries with
//! exponential backoff under a hard ceiling, and every lock carries a TTL so
//! a stale holder can be stolen by a fresh acquirer.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RepoError, RepoResult};

/// Scope of a repo lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Shared: may coexist with other read locks
    Read,
    /// Exclusive
    Write,
}

/// Identifies the repository a lock protects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub org_id: String,
    pub plan_id: String,
    pub branch: Option<String>,
}

/// Parameters for one acquisition attempt
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub org_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub branch: Option<String>,
    pub scope: LockScope,
}

impl LockRequest {
    fn key(&self) -> LockKey {
        LockKey {
            org_id: self.org_id.clone(),
            plan_id: self.plan_id.clone(),
            branch: self.branch.clone(),
        }
    }
}

/// A held lock
#[derive(Debug, Clone)]
pub struct RepoLock {
    pub id: Uuid,
    pub key: LockKey,
    pub scope: LockScope,
    /// User holding the lock
    pub holder: String,
    /// Past this instant the lock is stale and may be stolen
    pub expires_at: DateTime<Utc>,
}

const MAX_ATTEMPTS: usize = 10;
const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const ACQUIRE_CEILING: Duration = Duration::from_secs(60);
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// In-process lock table keyed by (org, plan, branch)
#[derive(Clone)]
pub struct LockManager {
    locks: Arc<Mutex<HashMap<LockKey, Vec<RepoLock>>>>,
    ttl: Duration,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Acquire a lock, retrying with exponential backoff
    ///
    /// Retries up to 10 times starting at 100 ms and doubling, bounded by
    /// the caller's deadline and an internal 60-second ceiling, whichever
    /// comes first.
    pub async fn acquire(
        &self,
        request: LockRequest,
        caller_deadline: Option<Duration>,
    ) -> RepoResult<Uuid> {
        let deadline = match caller_deadline {
            Some(d) => d.min(ACQUIRE_CEILING),
            None => ACQUIRE_CEILING,
        };
        let plan_id = request.plan_id.clone();

        tokio::time::timeout(deadline, self.acquire_with_retries(request))
            .await
            .unwrap_or_else(|_| {
                warn!(%plan_id, "lock acquisition timed out");
                Err(RepoError::LockUnavailable { plan_id })
            })
    }

    async fn acquire_with_retries(&self, request: LockRequest) -> RepoResult<Uuid> {
        let mut backoff = INITIAL_RETRY_INTERVAL;
        let mut last_err = RepoError::LockUnavailable {
            plan_id: request.plan_id.clone(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_acquire(&request) {
                Ok(lock_id) => {
                    debug!(plan_id = %request.plan_id, %lock_id, "acquired repo lock");
                    return Ok(lock_id);
                }
                Err(err) => {
                    last_err = err;
                    if attempt < MAX_ATTEMPTS {
                        debug!(
                            plan_id = %request.plan_id,
                            attempt,
                            "lock attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        warn!(plan_id = %request.plan_id, "lock retries exhausted");
        Err(last_err)
    }

    /// One non-blocking acquisition attempt
    pub fn try_acquire(&self, request: &LockRequest) -> RepoResult<Uuid> {
        let key = request.key();
        let now = Utc::now();
        let mut locks = lock_table(&self.locks);
        let held = locks.entry(key.clone()).or_default();

        // Stale locks past their TTL are stolen by the fresh acquirer.
        held.retain(|l| l.expires_at > now);

        let conflict = match request.scope {
            LockScope::Read => held.iter().any(|l| l.scope == LockScope::Write),
            LockScope::Write => !held.is_empty(),
        };
        if conflict {
            return Err(RepoError::LockConflict {
                plan_id: request.plan_id.clone(),
            });
        }

        let lock = RepoLock {
            id: Uuid::new_v4(),
            key,
            scope: request.scope,
            holder: request.user_id.clone(),
            expires_at: now
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        };
        let lock_id = lock.id;
        held.push(lock);
        Ok(lock_id)
    }

    /// Release a lock; releasing an unknown id is a no-op
    pub fn release(&self, lock_id: Uuid) {
        let mut locks = lock_table(&self.locks);
        for held in locks.values_mut() {
            held.retain(|l| l.id != lock_id);
        }
        locks.retain(|_, held| !held.is_empty());
        debug!(%lock_id, "released repo lock");
    }

    /// Snapshot of the locks currently held for a key
    pub fn held(&self, key: &LockKey) -> Vec<RepoLock> {
        let now = Utc::now();
        lock_table(&self.locks)
            .get(key)
            .map(|held| {
                held.iter()
                    .filter(|l| l.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_table(
    locks: &Mutex<HashMap<LockKey, Vec<RepoLock>>>,
) -> std::sync::MutexGuard<'_, HashMap<LockKey, Vec<RepoLock>>> {
    // recover the guard on poison; the map stays consistent
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
