//! The job registry store.
//!
//! Every operation is atomic for a single key; nothing spans several keys.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{JobEntry, Signature};

/// Key/value store of in-flight and recently finished jobs.
pub trait JobStore: Send + Sync {
    /// Returns a copy of the entry for `sig`.
    fn get(&self, sig: &Signature) -> Option<JobEntry>;

    /// Inserts `entry` unless `sig` is present. Returns true if inserted.
    fn insert_if_absent(&self, sig: &Signature, entry: JobEntry) -> bool;

    /// Applies `f` to the entry for `sig`. Returns false if there is none.
    fn update(&self, sig: &Signature, f: &mut dyn FnMut(&mut JobEntry)) -> bool;

    /// Removes and returns the entry for `sig`.
    fn remove(&self, sig: &Signature) -> Option<JobEntry>;

    /// Removes the entry for `sig` if `predicate` holds for it.
    fn remove_if(&self, sig: &Signature, predicate: &dyn Fn(&JobEntry) -> bool) -> Option<JobEntry>;

    /// A snapshot of the keys.
    fn keys(&self) -> Vec<Signature>;

    /// Number of entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`JobStore`] shared by every worker thread.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    entries: DashMap<Signature, JobEntry>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, sig: &Signature) -> Option<JobEntry> {
        self.entries.get(sig).map(|e| e.value().clone())
    }

    fn insert_if_absent(&self, sig: &Signature, entry: JobEntry) -> bool {
        match self.entries.entry(sig.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    fn update(&self, sig: &Signature, f: &mut dyn FnMut(&mut JobEntry)) -> bool {
        match self.entries.get_mut(sig) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn remove(&self, sig: &Signature) -> Option<JobEntry> {
        self.entries.remove(sig).map(|(_, entry)| entry)
    }

    fn remove_if(&self, sig: &Signature, predicate: &dyn Fn(&JobEntry) -> bool) -> Option<JobEntry> {
        self.entries
            .remove_if(sig, |_, entry| predicate(entry))
            .map(|(_, entry)| entry)
    }

    fn keys(&self) -> Vec<Signature> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
