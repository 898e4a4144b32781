// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The parallel executor collaborator (spec.md §6): an unbounded pool that
//! runs async [`crate::entry::Entry`] dispatch off the Looper's own thread.
//!
//! The workspace's existing thread-lifecycle code
//! ([`resilient_reactor_thread`]) spawns named threads directly via
//! [`std::thread::Builder`] rather than reaching for a pooling crate; this
//! module follows the same convention. "Unbounded pool" here means spawn-per
//! -submission with no queueing and no cap, which is the simplest thing that
//! satisfies spec.md's contract — there is no pool state to manage or shut
//! down.
//!
//! [`resilient_reactor_thread`]: https://docs.rs/r3bl_tui

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of work submitted to a [`ParallelExecutor`]. Boxed so the executor
/// doesn't need to be generic over the task type.
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// An unbounded parallel worker executor. [`crate::looper::Looper`] submits
/// to this for every `async`-flagged [`crate::entry::Entry`] and for
/// [`crate::looper::LooperFlags::ASYNC`]-flagged loopers.
pub trait ParallelExecutor: Send + Sync {
    /// Runs `task` on some thread other than the caller's. Must not block the
    /// caller waiting for `task` to finish.
    fn submit(&self, task: BoxedTask);
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Default [`ParallelExecutor`]: one named, detached thread per submission.
///
/// Panics inside `task` are caught so a misbehaving async entry can never
/// take down an unrelated thread silently; the panic is logged and swallowed,
/// matching [`crate::looper::Looper`]'s own `catch_unwind` discipline for
/// synchronous dispatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPoolExecutor;

impl ParallelExecutor for ThreadPoolExecutor {
    fn submit(&self, task: BoxedTask) {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst);
        let spawn_result = std::thread::Builder::new()
            .name(format!("r3bl-looper-worker-{id}"))
            .spawn(move || {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(worker_id = id, "async looper task panicked");
                }
            });
        if let Err(spawn_err) = spawn_result {
            tracing::error!(error = %spawn_err, "failed to spawn async looper worker thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn submitted_task_runs_off_caller_thread() {
        let executor = ThreadPoolExecutor;
        let (tx, rx) = mpsc::channel();
        let caller_thread = std::thread::current().id();
        executor.submit(Box::new(move || {
            tx.send(std::thread::current().id()).unwrap();
        }));
        let worker_thread = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_ne!(caller_thread, worker_thread);
    }

    #[test]
    fn panicking_task_does_not_propagate() {
        let executor = ThreadPoolExecutor;
        let (tx, rx) = mpsc::channel();
        executor.submit(Box::new(move || {
            tx.send(()).unwrap();
            panic!("boom");
        }));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    }
}
