//! Process-wide registry of in-flight proposals
//!
//! Mutation goes through `update`, which runs the caller's closure under
//! exclusion so no two updates interleave for the same id. Readers take a
//! snapshot clone.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use uuid::Uuid;

use crate::models::Proposal;

/// Guarded map of proposal id → proposal
#[derive(Clone, Default)]
pub struct ProposalRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Proposal>>>,
}

impl ProposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proposal under its id
    pub fn insert(&self, proposal: Proposal) {
        self.table().insert(proposal.id, proposal);
    }

    /// Mutate the proposal under exclusion; returns false when absent
    pub fn update<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Proposal),
    {
        let mut table = self.table();
        match table.get_mut(&id) {
            Some(proposal) => {
                f(proposal);
                true
            }
            None => false,
        }
    }

    /// Remove a proposal; removing an unknown id is a no-op
    pub fn remove(&self, id: Uuid) -> Option<Proposal> {
        self.table().remove(&id)
    }

    /// Snapshot of a proposal
    pub fn get(&self, id: Uuid) -> Option<Proposal> {
        self.table().get(&id).cloned()
    }

    /// Snapshots of every active proposal under a root, any order
    pub fn by_root(&self, root_id: Uuid) -> Vec<Proposal> {
        self.table()
            .values()
            .filter(|p| p.root_id == root_id)
            .cloned()
            .collect()
    }

    /// Fire the proposal's cancellation handle; returns false when absent
    pub fn cancel(&self, id: Uuid) -> bool {
        let cancel = self.table().get(&id).map(|p| p.cancel.clone());
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Uuid, Proposal>> {
        // recover the guard on poison; the map stays consistent
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
