// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Entry`]: the single enqueueable unit a [`crate::queue::Queue`] stores —
//! a task, a message, or a barrier sentinel. See spec §3 for the full field
//! list and invariants this type preserves.

use std::any::Any;
use std::fmt;

use crate::handler::Handler;
use crate::id::{next_entry_id, BarrierToken, EntryId};

/// A unit of work posted to a [`crate::queue::Queue`]. Boxed so `post` call
/// sites don't need to be generic over the closure type.
pub type Callable = Box<dyn FnOnce() + Send + 'static>;

/// What kind of work an [`Entry`] carries.
pub enum EntryKind {
    /// A plain callable, posted via [`Handler::post`] and friends.
    Task,
    /// A tagged message, posted via [`Handler::send_message`] and friends.
    /// May still carry its own [`Entry::callable`] if the message was built
    /// from a closure rather than a bare `what`/payload pair.
    Message { what: i32, payload: Option<Box<dyn Any + Send>> },
    /// A sentinel that withholds synchronous dispatch until removed by
    /// [`crate::queue::Queue::remove_barrier`]. Never itself dispatched.
    Barrier { token: BarrierToken },
}

/// An enqueueable unit: a task, a message, or a barrier (spec §3).
///
/// Once [`Entry::finalized`] is set — the instant the entry is handed to
/// user code for dispatch — the entry must not be mutated again. Once
/// [`Entry::recycled`] is set, the entry must never reappear in any queue.
/// In this implementation both invariants are additionally enforced
/// structurally: an `Entry` removed from a [`crate::queue::Queue`] is never
/// aliased, so it cannot be dispatched or recycled twice even if these flags
/// were never checked. They are kept anyway because they are part of the
/// data model callers (and tests) reason about.
pub struct Entry {
    pub id: EntryId,
    pub when: i64,
    pub kind: EntryKind,
    pub is_async: bool,
    pub callable: Option<Callable>,
    pub target: Option<Handler>,
    pub(crate) finalized: bool,
    pub(crate) recycled: bool,
}

impl Entry {
    pub(crate) fn new_task(callable: Callable, is_async: bool, target: Option<Handler>) -> Self {
        Self {
            id: next_entry_id(),
            when: 0,
            kind: EntryKind::Task,
            is_async,
            callable: Some(callable),
            target,
            finalized: false,
            recycled: false,
        }
    }

    pub(crate) fn new_message(
        what: i32,
        payload: Option<Box<dyn Any + Send>>,
        callable: Option<Callable>,
        is_async: bool,
        target: Handler,
    ) -> Self {
        Self {
            id: next_entry_id(),
            when: 0,
            kind: EntryKind::Message { what, payload },
            is_async,
            callable,
            target: Some(target),
            finalized: false,
            recycled: false,
        }
    }

    pub(crate) fn new_barrier(token: BarrierToken) -> Self {
        Self {
            id: next_entry_id(),
            when: 0,
            kind: EntryKind::Barrier { token },
            is_async: false,
            callable: None,
            target: None,
            finalized: false,
            recycled: false,
        }
    }

    #[must_use]
    pub fn is_barrier(&self) -> bool { matches!(self.kind, EntryKind::Barrier { .. }) }

    #[must_use]
    pub fn finalized(&self) -> bool { self.finalized }

    #[must_use]
    pub fn recycled(&self) -> bool { self.recycled }

    pub(crate) fn finalize(&mut self) {
        debug_assert!(!self.finalized, "entry finalized twice");
        self.finalized = true;
    }

    pub(crate) fn recycle(&mut self) {
        debug_assert!(!self.recycled, "entry recycled twice");
        self.recycled = true;
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind_name = match &self.kind {
            EntryKind::Task => "Task",
            EntryKind::Message { what, .. } => return f
                .debug_struct("Entry")
                .field("id", &self.id)
                .field("when", &self.when)
                .field("kind", &"Message")
                .field("what", what)
                .field("is_async", &self.is_async)
                .field("finalized", &self.finalized)
                .field("recycled", &self.recycled)
                .finish(),
            EntryKind::Barrier { token } => return f
                .debug_struct("Entry")
                .field("id", &self.id)
                .field("when", &self.when)
                .field("kind", &"Barrier")
                .field("token", token)
                .finish(),
        };
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("when", &self.when)
            .field("kind", &kind_name)
            .field("is_async", &self.is_async)
            .field("finalized", &self.finalized)
            .field("recycled", &self.recycled)
            .finish()
    }
}
