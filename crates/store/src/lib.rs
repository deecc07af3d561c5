//! Mirador store: thread-safe keyed snapshot of last-known object state.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::gauge;
use mirador_core::{ObjectRef, ObjectState};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Keyed mapping from object identity to its last-known state.
///
/// Single writer (the reflector), any number of concurrent readers. Entries
/// are immutable snapshots replaced atomically per key, so readers never see
/// a partially written object. `list` gives no snapshot consistency across
/// keys under concurrent mutation.
#[derive(Debug, Default)]
pub struct Store {
    entries: RwLock<FxHashMap<ObjectRef, Arc<ObjectState>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ObjectRef) -> Option<Arc<ObjectState>> {
        self.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ObjectState>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Insert or replace; returns the displaced entry, if any.
    pub fn put(&self, state: Arc<ObjectState>) -> Option<Arc<ObjectState>> {
        let mut entries = self.write();
        let prev = entries.insert(state.id.clone(), state);
        gauge!("mirador_store_objects", entries.len() as f64);
        prev
    }

    /// Remove by identity; returns the removed entry, if any.
    pub fn delete(&self, id: &ObjectRef) -> Option<Arc<ObjectState>> {
        let mut entries = self.write();
        let prev = entries.remove(id);
        gauge!("mirador_store_objects", entries.len() as f64);
        prev
    }

    /// Drop every entry whose identity is not in `keep`, returning the
    /// removals. Used for the wholesale replacement after a full re-list.
    pub fn retain(&self, keep: &HashSet<ObjectRef>) -> Vec<Arc<ObjectState>> {
        let mut entries = self.write();
        let mut removed = Vec::new();
        entries.retain(|id, state| {
            if keep.contains(id) {
                true
            } else {
                removed.push(Arc::clone(state));
                false
            }
        });
        gauge!("mirador_store_objects", entries.len() as f64);
        trace!(removed = removed.len(), "store pruned after re-list");
        removed
    }

    // Lock poisoning only happens if a writer panicked mid-call; entries are
    // plain data, so the map is still intact and we keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<ObjectRef, Arc<ObjectState>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<ObjectRef, Arc<ObjectState>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
