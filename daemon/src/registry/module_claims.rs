//! Claims on module sub-cache artifacts.
//!
//! Before computing a module artifact, a worker claims its key. Other workers
//! needing the same artifact wait on the claim for a bounded time and then
//! re-check the cache. A claim that is released without finishing means
//! "retry", so a failed or crashed claimant never blocks its peers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

/// State of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// The claimant is computing the artifact.
    Running,
    /// The artifact was written.
    Finished,
    /// The claimant gave up; the next worker may claim again.
    Released,
}

/// A claim on one module artifact.
#[derive(Debug)]
pub struct ModuleClaim {
    state: Mutex<ClaimState>,
    changed: Condvar,
    created: Instant,
}

impl ModuleClaim {
    fn new() -> Self {
        Self {
            state: Mutex::new(ClaimState::Running),
            changed: Condvar::new(),
            created: Instant::now(),
        }
    }

    pub fn state(&self) -> ClaimState {
        *self.state.lock()
    }

    /// Waits until the claim leaves `Running` or `timeout` elapses. Returns
    /// the state observed last.
    pub fn wait_for(&self, timeout: Duration) -> ClaimState {
        let mut state = self.state.lock();
        if *state == ClaimState::Running {
            let _ = self.changed.wait_for(&mut state, timeout);
        }
        *state
    }

    fn set(&self, new: ClaimState) {
        *self.state.lock() = new;
        self.changed.notify_all();
    }
}

/// Result of [`ModuleClaims::acquire`].
pub enum Acquire {
    /// The caller owns the claim and must compute the artifact.
    Owner(ClaimGuard),
    /// Another worker is computing it.
    Busy(Arc<ModuleClaim>),
}

/// Table of module claims keyed by `<module>/<signature>`.
#[derive(Debug, Default)]
pub struct ModuleClaims {
    claims: DashMap<String, Arc<ModuleClaim>>,
}

impl ModuleClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` unless a running claim exists. Finished and released
    /// claims are replaced: the caller has already found the artifact missing.
    pub fn acquire(self: &Arc<Self>, key: &str) -> Acquire {
        let claim = match self.claims.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state() == ClaimState::Running {
                    return Acquire::Busy(Arc::clone(occupied.get()));
                }
                let claim = Arc::new(ModuleClaim::new());
                occupied.insert(Arc::clone(&claim));
                claim
            }
            Entry::Vacant(vacant) => {
                let claim = Arc::new(ModuleClaim::new());
                vacant.insert(Arc::clone(&claim));
                claim
            }
        };
        Acquire::Owner(ClaimGuard {
            claims: Arc::clone(self),
            key: key.to_string(),
            claim,
            finished: false,
        })
    }

    /// Drops finished claims older than `age`. Returns how many were dropped.
    pub fn evict_finished(&self, age: Duration) -> usize {
        let before = self.claims.len();
        self.claims
            .retain(|_, claim| !(claim.state() == ClaimState::Finished && claim.created.elapsed() >= age));
        before.saturating_sub(self.claims.len())
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Ownership of a claim. Dropping it without [`ClaimGuard::finish`] releases
/// the claim and wakes every waiter.
#[derive(Debug)]
pub struct ClaimGuard {
    claims: Arc<ModuleClaims>,
    key: String,
    claim: Arc<ModuleClaim>,
    finished: bool,
}

impl ClaimGuard {
    /// Marks the artifact written.
    pub fn finish(mut self) {
        self.claim.set(ClaimState::Finished);
        self.finished = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.claim.set(ClaimState::Released);
        let claim = &self.claim;
        self.claims
            .claims
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, claim));
    }
}
