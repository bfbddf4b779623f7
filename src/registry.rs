//! Identity-keyed set of submitted documents and their extraction state.
//!
//! The registry is mutated from two places: the orchestrator while a batch
//! runs and user-facing callers at any time. Every keyed mutation is a no-op
//! when the identity is gone, so neither side needs exclusive access for
//! longer than a single call.

use crate::document::{Document, DocumentEntry, DocumentId, ExtractionState};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct Registry {
    next_id: u64,
    // Identities are issued in increasing order, so key order is insertion order.
    entries: BTreeMap<DocumentId, DocumentEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, document: Document) -> DocumentId {
        self.next_id += 1;
        let id = DocumentId::new(self.next_id);
        debug!(%id, name = %document.name, kind = %document.kind, "registry add");
        self.entries.insert(
            id,
            DocumentEntry {
                id,
                document,
                state: ExtractionState::Pending,
            },
        );
        id
    }

    /// Returns the removed entry, or `None` if the identity was already gone.
    pub fn remove(&mut self, id: DocumentId) -> Option<DocumentEntry> {
        let removed = self.entries.remove(&id);
        if removed.is_some() {
            debug!(%id, "registry remove");
        }
        removed
    }

    pub fn list(&self) -> Vec<DocumentEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn get(&self, id: DocumentId) -> Option<&DocumentEntry> {
        self.entries.get(&id)
    }

    /// Ignored when the identity is no longer present.
    pub fn set_state(&mut self, id: DocumentId, state: ExtractionState) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => {
                debug!(%id, "set_state on removed entry ignored");
                false
            }
        }
    }

    /// Identity of the newest entry, used as the cutoff of a batch run.
    pub fn last_id(&self) -> Option<DocumentId> {
        self.entries.keys().next_back().copied()
    }

    /// Next entry strictly after `cursor` that a run should visit: every
    /// entry up to `cutoff` whatever its state, later ones only while pending.
    pub fn next_for_run(
        &self,
        cursor: Option<DocumentId>,
        cutoff: Option<DocumentId>,
    ) -> Option<DocumentEntry> {
        let lower = match cursor {
            Some(c) => Bound::Excluded(c),
            None => Bound::Unbounded,
        };
        self.entries
            .range((lower, Bound::Unbounded))
            .map(|(_, e)| e)
            .find(|e| Some(e.id) <= cutoff || e.state == ExtractionState::Pending)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry shared between the orchestrator and its callers.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<Mutex<Registry>>);

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard must not be held across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Registry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, document: Document) -> DocumentId {
        self.lock().add(document)
    }

    pub fn remove(&self, id: DocumentId) -> Option<DocumentEntry> {
        self.lock().remove(id)
    }

    pub fn list(&self) -> Vec<DocumentEntry> {
        self.lock().list()
    }

    pub fn get(&self, id: DocumentId) -> Option<DocumentEntry> {
        self.lock().get(id).cloned()
    }

    pub fn set_state(&self, id: DocumentId, state: ExtractionState) -> bool {
        self.lock().set_state(id, state)
    }

    pub fn last_id(&self) -> Option<DocumentId> {
        self.lock().last_id()
    }

    pub fn next_for_run(
        &self,
        cursor: Option<DocumentId>,
        cutoff: Option<DocumentId>,
    ) -> Option<DocumentEntry> {
        self.lock().next_for_run(cursor, cutoff)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
