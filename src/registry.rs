// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The process-global registry mapping a thread id to the [`Looper`] that
//! thread is running (spec.md §4.4). A thread executing an async-dispatched
//! entry is also aliased here for the duration of that dispatch, so
//! [`obtain`]/[`obtain_matching`] called from inside an async callback still
//! resolve to the looper that submitted the work — the alias is removed the
//! instant the callback returns, a plain acquire/release scope rather than a
//! weak-reference table that relies on drop order.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::thread::ThreadId;

use crate::looper::{Looper, LooperFlags};

fn registry() -> &'static Mutex<HashMap<ThreadId, Looper>> {
    static REGISTRY: OnceLock<Mutex<HashMap<ThreadId, Looper>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `looper` as the one running on (or aliased to) `thread_id`,
/// overwriting any prior association. Called by [`Looper::run`] at the start
/// of its dispatch loop and by async-dispatch worker threads.
///
/// [`Looper::run`]: crate::looper::Looper::run
pub(crate) fn register(thread_id: ThreadId, looper: Looper) {
    registry().lock().unwrap().insert(thread_id, looper);
}

/// Removes the alias installed for `thread_id`, if any. Called once an
/// async-dispatched entry's worker thread finishes running it.
pub(crate) fn remove_alias(thread_id: ThreadId) {
    registry().lock().unwrap().remove(&thread_id);
}

/// Removes every registry entry pointing at `looper`. Called by
/// [`Looper::destroy`].
///
/// [`Looper::destroy`]: crate::looper::Looper::destroy
pub(crate) fn unregister(looper: &Looper) {
    registry().lock().unwrap().retain(|_, registered| !looper_eq(registered, looper));
}

fn looper_eq(a: &Looper, b: &Looper) -> bool { a.queue() as *const _ == b.queue() as *const _ }

/// Returns the [`Looper`] registered for the current thread, creating and
/// registering a fresh default one if none exists yet.
#[must_use]
pub fn obtain() -> Looper { obtain_matching(|_| true) }

/// Like [`obtain`], but replaces the current thread's association with a
/// fresh default looper if the existing one fails `predicate`.
#[must_use]
pub fn obtain_matching(predicate: impl Fn(&Looper) -> bool) -> Looper {
    let thread_id = std::thread::current().id();
    let mut guard = registry().lock().unwrap();
    if let Some(looper) = guard.get(&thread_id) {
        if predicate(looper) {
            return looper.clone();
        }
    }
    let looper = Looper::new_default(LooperFlags::NONE);
    guard.insert(thread_id, looper.clone());
    looper
}
