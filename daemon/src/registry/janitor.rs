//! Periodic reconciliation of the registry with live workers.
//!
//! The janitor runs on its own thread. Each sweep leaves young entries
//! alone, evicts finished entries nobody collected, and evicts unfinished
//! entries whose worker is gone. Entries are checked and removed one key at a
//! time, so it never blocks dispatch.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::types::JobEntry;

use super::module_claims::ModuleClaims;
use super::store::JobStore;
use super::workers::Workers;

/// What a sweep evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Finished entries past the grace window.
    pub finished: usize,
    /// Unfinished entries whose worker is gone.
    pub dead: usize,
    /// Finished module claims past the grace window.
    pub claims: usize,
}

/// Runs one sweep.
pub fn sweep(
    store: &dyn JobStore,
    workers: &Workers,
    claims: &ModuleClaims,
    grace: Duration,
    now: SystemTime,
) -> SweepReport {
    let mut report = SweepReport::default();
    let is_stale = |entry: &JobEntry| {
        entry.age(now) >= grace
            && (entry.is_finished() || !entry.worker.is_some_and(|w| workers.is_alive(w)))
    };

    for sig in store.keys() {
        let Some(removed) = store.remove_if(&sig, &is_stale) else {
            continue;
        };
        if removed.is_finished() {
            debug!(job = %sig, "evicted finished job");
            report.finished += 1;
        } else {
            warn!(
                job = %sig,
                worker = ?removed.worker,
                "worker exited without reporting a result; evicted its job"
            );
            report.dead += 1;
        }
    }
    report.claims = claims.evict_finished(grace);
    report
}

/// Handle on the janitor thread.
pub struct Janitor {
    sender: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Starts sweeping every `interval`.
    pub fn start(
        store: Arc<dyn JobStore>,
        workers: Arc<Workers>,
        claims: Arc<ModuleClaims>,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<()>();
        let thread_handle = thread::Builder::new()
            .name("janitor".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let report = sweep(store.as_ref(), &workers, &claims, grace, SystemTime::now());
                        if report != SweepReport::default() {
                            info!(
                                finished = report.finished,
                                dead = report.dead,
                                claims = report.claims,
                                "janitor sweep"
                            );
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| warn!(error = %e, "could not start the janitor thread"))
            .ok();

        Self {
            sender,
            thread_handle,
        }
    }

    /// Stops the janitor and waits for its thread.
    pub fn shutdown(&mut self) {
        self.sender.send(()).ok();
        if let Some(handle) = self.thread_handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
