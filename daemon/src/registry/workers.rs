//! Liveness of worker threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;

use crate::types::WorkerId;

/// Table of live workers.
#[derive(Debug, Default)]
pub struct Workers {
    next_id: AtomicU64,
    alive: DashSet<WorkerId>,
}

impl Workers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new live worker. It stays alive until the guard is
    /// dropped, including by a panic unwinding the worker thread.
    pub fn register(self: &Arc<Self>) -> WorkerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.alive.insert(id);
        WorkerGuard {
            id,
            workers: Arc::clone(self),
        }
    }

    pub fn is_alive(&self, id: WorkerId) -> bool {
        self.alive.contains(&id)
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }
}

/// Marks its worker dead when dropped.
#[derive(Debug)]
pub struct WorkerGuard {
    id: WorkerId,
    workers: Arc<Workers>,
}

impl WorkerGuard {
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.workers.alive.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn guard_controls_liveness() {
        let workers = Arc::new(Workers::new());
        let guard = workers.register();
        let id = guard.id();
        assert!(workers.is_alive(id));
        drop(guard);
        assert!(!workers.is_alive(id));
        assert!(workers.is_empty());
    }

    #[test]
    fn panicking_worker_is_dead() {
        let workers = Arc::new(Workers::new());
        let guard = workers.register();
        let id = guard.id();
        let result = thread::spawn(move || {
            let _guard = guard;
            panic!("module crashed");
        })
        .join();
        assert!(result.is_err());
        assert!(!workers.is_alive(id));
    }
}
