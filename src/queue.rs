// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Queue`]: the time-ordered multiset a [`crate::looper::Looper`] drains.
//! Mirrors spec.md §4.1 exactly — the six-step `next` protocol, barrier
//! stalling, and the blocking/non-blocking split all live here.
//!
//! The lock is a plain [`std::sync::Mutex`]: it is only ever held for O(1)
//! map mutations, never across a dispatched callback, so there is no
//! reentrant-post deadlock to guard against and no need for a hand-rolled
//! reentrant lock. [`Condvar`] handles the BLOCKING-mode wait/wake dance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::entry::{Entry, EntryKind};
use crate::error::PostError;
use crate::id::{next_barrier_token, BarrierToken};

/// Sort key: `when` first, then a rank that puts barriers ahead of ordinary
/// entries sharing the same `when`, then `id` as the final FIFO tiebreak.
type SortKey = (i64, u8, u64);

const RANK_BARRIER: u8 = 0;
const RANK_ENTRY: u8 = 1;

fn sort_key(entry: &Entry) -> SortKey {
    let rank = if entry.is_barrier() { RANK_BARRIER } else { RANK_ENTRY };
    (entry.when, rank, entry.id.value())
}

/// What [`Queue::next`] found, mirroring the `activeResult` values of
/// spec.md §3 (`NONE` is simply "haven't called next yet" and has no
/// variant here).
#[derive(Debug)]
pub enum NextOutcome {
    /// An entry is ready now. Callers must eventually call
    /// [`Queue::clear_active`] once they're done with it.
    Success(Entry),
    /// The queue is empty. Only returned when BLOCKING is off.
    Empty,
    /// The earliest entry is behind an active barrier with no ready async
    /// entry to take its place.
    Stalled,
    /// The earliest entry isn't due yet; carries its `when` so the caller
    /// can size a cooperative sleep. Only returned when BLOCKING is off.
    Waiting(i64),
}

enum Promotion {
    Entry(Entry),
    Empty,
    Stalled,
    WaitingUntil(i64),
}

struct Inner {
    entries: BTreeMap<SortKey, Entry>,
    active: bool,
    quitting: bool,
    blocked: bool,
}

/// The time-ordered entry multiset owned by one [`crate::looper::Looper`].
pub struct Queue {
    inner: Mutex<Inner>,
    condvar: Condvar,
    blocking_enabled: bool,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.lock().unwrap();
        f.debug_struct("Queue")
            .field("pending", &guard.entries.len())
            .field("active", &guard.active)
            .field("quitting", &guard.quitting)
            .field("blocking_enabled", &self.blocking_enabled)
            .finish()
    }
}

impl Queue {
    #[must_use]
    pub fn new(blocking_enabled: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                active: false,
                quitting: false,
                blocked: false,
            }),
            condvar: Condvar::new(),
            blocking_enabled,
        }
    }

    /// Enqueues `entry` at absolute time `when` (milliseconds, same clock
    /// the owning looper uses). Fails if the queue is quitting, in which
    /// case `entry` is recycled and dropped rather than silently kept.
    pub fn post(&self, mut entry: Entry, when: i64) -> Result<(), PostError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.quitting {
            entry.recycle();
            drop(entry);
            return Err(PostError::QueueIsQuitting);
        }
        entry.when = when;
        guard.entries.insert(sort_key(&entry), entry);
        drop(guard);
        self.condvar.notify_all();
        Ok(())
    }

    /// Inserts a barrier at `when = 0`, ranked ahead of any ordinary entry
    /// sharing that `when`. Returns a token for later removal.
    pub fn post_barrier(&self) -> BarrierToken {
        let token = next_barrier_token();
        let entry = Entry::new_barrier(token);
        let mut guard = self.inner.lock().unwrap();
        guard.entries.insert(sort_key(&entry), entry);
        drop(guard);
        self.condvar.notify_all();
        token
    }

    /// Removes the barrier identified by `token`, if still present. No-op if
    /// it was never posted or has already been removed.
    pub fn remove_barrier(&self, token: BarrierToken) {
        let mut guard = self.inner.lock().unwrap();
        let key = guard.entries.iter().find_map(|(key, entry)| match entry.kind {
            EntryKind::Barrier { token: t } if t == token => Some(*key),
            _ => None,
        });
        if let Some(key) = key {
            if let Some(mut removed) = guard.entries.remove(&key) {
                removed.recycle();
            }
        }
        drop(guard);
        self.condvar.notify_all();
    }

    /// Removes and recycles every non-barrier entry for which `predicate`
    /// returns `true`. Barriers are never matched; remove them explicitly
    /// with [`Queue::remove_barrier`].
    pub fn remove(&self, predicate: impl Fn(&Entry) -> bool) {
        let mut guard = self.inner.lock().unwrap();
        let keys: Vec<SortKey> = guard
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_barrier() && predicate(entry))
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            if let Some(mut removed) = guard.entries.remove(&key) {
                removed.recycle();
            }
        }
    }

    /// Wakes a thread blocked inside [`Queue::next`]. No-op if BLOCKING is
    /// disabled for this queue.
    pub fn wake(&self) {
        if self.blocking_enabled {
            self.condvar.notify_all();
        }
    }

    /// Marks the queue as quitting. If `drop_all`, every currently-queued
    /// entry (barriers included) is recycled and discarded immediately.
    /// Otherwise only entries with `when > now` are recycled and discarded;
    /// entries already due are left for the draining pass to deliver.
    pub fn quit(&self, drop_all: bool, now: i64) {
        let mut guard = self.inner.lock().unwrap();
        guard.quitting = true;
        if drop_all {
            let mut drained = std::mem::take(&mut guard.entries);
            for (_, mut entry) in drained.drain() {
                entry.recycle();
            }
        } else {
            let keys: Vec<SortKey> =
                guard.entries.iter().filter(|(_, entry)| entry.when > now).map(|(key, _)| *key).collect();
            for key in keys {
                if let Some(mut removed) = guard.entries.remove(&key) {
                    removed.recycle();
                }
            }
        }
        drop(guard);
        self.condvar.notify_all();
    }

    #[must_use]
    pub fn is_quitting(&self) -> bool { self.inner.lock().unwrap().quitting }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        !guard.active && guard.entries.is_empty()
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool { self.inner.lock().unwrap().blocked }

    /// The six-step protocol of spec.md §4.1, looping internally across
    /// BLOCKING waits so callers never see an intermediate wakeup.
    pub fn next(&self, clock: &dyn Clock) -> NextOutcome {
        loop {
            let mut guard = self.inner.lock().unwrap();
            let now = clock.now_millis();
            match promote(&mut guard.entries, now) {
                Promotion::Entry(entry) => {
                    guard.active = true;
                    return NextOutcome::Success(entry);
                }
                Promotion::Stalled => return NextOutcome::Stalled,
                Promotion::Empty => {
                    if !self.blocking_enabled {
                        return NextOutcome::Empty;
                    }
                    guard.blocked = true;
                    let (mut guard2, _timeout) =
                        self.condvar.wait_timeout(guard, Duration::from_millis(1000)).unwrap();
                    guard2.blocked = false;
                    drop(guard2);
                }
                Promotion::WaitingUntil(next_when) => {
                    if !self.blocking_enabled {
                        return NextOutcome::Waiting(next_when);
                    }
                    let due_in = (next_when - now).max(0) as u64;
                    guard.blocked = true;
                    let (mut guard2, _timeout) =
                        self.condvar.wait_timeout(guard, Duration::from_millis(due_in)).unwrap();
                    guard2.blocked = false;
                    drop(guard2);
                }
            }
        }
    }

    /// Clears the "an entry is actively being dispatched" marker. Callers
    /// must call this exactly once after consuming the `Entry` returned by
    /// [`Queue::next`]'s `Success` variant.
    pub fn clear_active(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.active = false;
    }
}

fn promote(entries: &mut BTreeMap<SortKey, Entry>, now: i64) -> Promotion {
    let Some((&first_key, first_entry)) = entries.iter().next() else {
        return Promotion::Empty;
    };

    if first_entry.is_barrier() {
        let mut ready_key = None;
        for (&key, entry) in entries.iter().skip(1) {
            if entry.is_barrier() {
                continue;
            }
            if !entry.is_async {
                continue;
            }
            if entry.when <= now {
                ready_key = Some(key);
            }
            break;
        }
        return match ready_key {
            Some(key) => Promotion::Entry(entries.remove(&key).unwrap()),
            None => Promotion::Stalled,
        };
    }

    if first_entry.when <= now {
        Promotion::Entry(entries.remove(&first_key).unwrap())
    } else {
        Promotion::WaitingUntil(first_entry.when)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::handler::Handler;
    use crate::looper::{Looper, LooperFlags};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn task(entry_when: i64, target_clock: &Arc<AtomicI64>) -> Entry {
        let target_clock = Arc::clone(target_clock);
        Entry::new_task(Box::new(move || { target_clock.store(entry_when, Ordering::SeqCst); }), false, None)
    }

    #[test]
    fn fifo_order_for_equal_when() {
        let queue = Queue::new(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            let entry = Entry::new_task(Box::new(move || order.lock().unwrap().push(i)), false, None);
            queue.post(entry, 0).unwrap();
        }
        let clock = SystemClock::default();
        for _ in 0..3 {
            match queue.next(&clock) {
                NextOutcome::Success(entry) => {
                    if let Some(callable) = entry.callable {
                        callable();
                    }
                    queue.clear_active();
                }
                other => panic!("expected Success, got {other:?}"),
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn waiting_entry_reports_its_when() {
        let queue = Queue::new(false);
        let seen = Arc::new(AtomicI64::new(-1));
        queue.post(task(500, &seen), 500).unwrap();
        let clock = SystemClock::default();
        match queue.next(&clock) {
            NextOutcome::Waiting(when) => assert_eq!(when, 500),
            other => panic!("expected Waiting, got {other:?}"),
        }
    }

    #[test]
    fn barrier_blocks_sync_entries_but_not_async() {
        let queue = Queue::new(false);
        let seen = Arc::new(AtomicI64::new(-1));
        queue.post(task(0, &seen), 0).unwrap();
        let token = queue.post_barrier();
        let async_seen = Arc::new(AtomicI64::new(-1));
        let async_clock = Arc::clone(&async_seen);
        let async_entry =
            Entry::new_task(Box::new(move || async_clock.store(1, Ordering::SeqCst)), true, None);
        queue.post(async_entry, 0).unwrap();

        let clock = SystemClock::default();
        match queue.next(&clock) {
            NextOutcome::Success(entry) => {
                assert!(entry.is_async);
                queue.clear_active();
            }
            other => panic!("expected async entry to jump the barrier, got {other:?}"),
        }
        match queue.next(&clock) {
            NextOutcome::Stalled => {}
            other => panic!("expected Stalled behind the barrier, got {other:?}"),
        }
        queue.remove_barrier(token);
        match queue.next(&clock) {
            NextOutcome::Success(entry) => {
                assert!(!entry.is_async);
                queue.clear_active();
            }
            other => panic!("expected the sync entry once unblocked, got {other:?}"),
        }
    }

    #[test]
    fn quit_with_drop_all_recycles_everything() {
        let queue = Queue::new(false);
        let seen = Arc::new(AtomicI64::new(-1));
        queue.post(task(0, &seen), 0).unwrap();
        queue.quit(true, 0);
        assert!(queue.is_idle());
        assert!(matches!(queue.next(&SystemClock::default()), NextOutcome::Empty));
    }

    #[test]
    fn quit_without_drop_all_keeps_only_already_due_entries() {
        let queue = Queue::new(false);
        let due_now = Arc::new(AtomicI64::new(-1));
        let due_later = Arc::new(AtomicI64::new(-1));
        queue.post(task(0, &due_now), 0).unwrap();
        queue.post(task(1000, &due_later), 1000).unwrap();
        queue.quit(false, 10);
        match queue.next(&SystemClock::default()) {
            NextOutcome::Success(entry) => {
                if let Some(callable) = entry.callable {
                    callable();
                }
                queue.clear_active();
            }
            other => panic!("expected the already-due entry to survive, got {other:?}"),
        }
        assert!(queue.is_idle());
        assert_eq!(due_now.load(Ordering::SeqCst), 0);
        assert_eq!(due_later.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn post_after_quit_is_rejected() {
        let queue = Queue::new(false);
        queue.quit(false, 0);
        let seen = Arc::new(AtomicI64::new(-1));
        assert_eq!(queue.post(task(0, &seen), 0), Err(PostError::QueueIsQuitting));
    }

    #[test]
    fn remove_by_predicate_drops_matching_non_barrier_entries() {
        let looper = Looper::new_default(LooperFlags::NONE);
        let handler = Handler::new(looper.clone());
        handler.send_empty_message(1).unwrap();
        handler.send_empty_message(2).unwrap();
        looper.queue().remove(|_| true);
        assert!(looper.queue().is_idle());
    }

    #[test]
    fn is_blocked_is_set_while_waiting_and_cleared_on_wake() {
        let queue = Arc::new(Queue::new(true));
        assert!(!queue.is_blocked());

        let waiter = std::thread::spawn({
            let queue = Arc::clone(&queue);
            move || queue.next(&SystemClock::default())
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !queue.is_blocked() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(queue.is_blocked(), "queue should report blocked while next() waits on an empty queue");

        let seen = Arc::new(AtomicI64::new(-1));
        queue.post(task(0, &seen), 0).unwrap();

        match waiter.join().unwrap() {
            NextOutcome::Success(entry) => {
                if let Some(callable) = entry.callable {
                    callable();
                }
                queue.clear_active();
            }
            other => panic!("expected Success once the post wakes the waiter, got {other:?}"),
        }
        assert!(!queue.is_blocked());
    }
}
