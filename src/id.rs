// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-global monotonically increasing id generators for [`EntryId`] and
//! [`BarrierToken`]. Both wrap a `u64` `AtomicU64` counter; spec.md §5 treats
//! the wrap at `u64::MAX` as defensive and practically unreachable, so
//! [`wrapping_add`] is used rather than panicking or saturating.
//!
//! [`wrapping_add`]: u64::wrapping_add

use std::sync::atomic::{AtomicU64, Ordering};

/// Globally unique, monotonically increasing identifier stamped on every
/// [`crate::entry::Entry`] at post time. Used as the tiebreak for entries
/// sharing the same `when`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    #[must_use]
    pub fn value(self) -> u64 { self.0 }
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next [`EntryId`]. Safe to call concurrently from any thread.
#[must_use]
pub fn next_entry_id() -> EntryId {
    EntryId(NEXT_ENTRY_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.wrapping_add(1))
    }).unwrap_or(0))
}

/// Unique token identifying a posted barrier, returned by
/// [`crate::queue::Queue::post_barrier`] and required to remove it again via
/// [`crate::queue::Queue::remove_barrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierToken(u64);

static NEXT_BARRIER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Allocates the next [`BarrierToken`]. Safe to call concurrently from any
/// thread.
#[must_use]
pub fn next_barrier_token() -> BarrierToken {
    BarrierToken(NEXT_BARRIER_TOKEN.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.wrapping_add(1))
    }).unwrap_or(0))
}
