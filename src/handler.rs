// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Handler`]: the per-owner facade over a [`crate::looper::Looper`]'s
//! queue (spec.md §4.2). Multiple handlers can share one looper; each
//! carries its own optional message interceptor/sink pair and its own
//! `async` default.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::entry::{Callable, Entry, EntryKind};
use crate::error::{PostError, ProgrammingFault};
use crate::exception_sink::ExceptionSink;
use crate::id::{BarrierToken, EntryId};
use crate::looper::{Looper, LooperFlags};

/// A read-only view of a dispatched message, handed to the interceptor and
/// fallback callbacks. Borrows its payload rather than cloning it since both
/// callbacks run on the same thread, one after the other, while the owning
/// [`crate::entry::Entry`] is still alive.
pub struct Message<'a> {
    pub what: i32,
    pub payload: Option<&'a (dyn Any + Send)>,
}

/// Returning `true` suppresses the fallback [`Handler`] callback.
pub type InterceptCallback = Box<dyn Fn(&Message<'_>) -> bool + Send + Sync>;
pub type MessageCallback = Box<dyn Fn(&Message<'_>) + Send + Sync>;

struct HandlerInner {
    looper: Looper,
    is_async: bool,
    intercept: Option<InterceptCallback>,
    on_message: Option<MessageCallback>,
}

/// Cheaply cloneable handle bound to one [`Looper`]. Construct with
/// [`Handler::new`] for a plain handler, or [`Handler::builder`] to attach a
/// message interceptor and/or fallback callback.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("is_async", &self.inner.is_async)
            .field("has_intercept", &self.inner.intercept.is_some())
            .field("has_on_message", &self.inner.on_message.is_some())
            .finish()
    }
}

/// Builds a [`Handler`] with optional message callbacks.
#[derive(Default)]
pub struct HandlerBuilder {
    is_async: bool,
    intercept: Option<InterceptCallback>,
    on_message: Option<MessageCallback>,
}

impl fmt::Debug for HandlerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBuilder").field("is_async", &self.is_async).finish()
    }
}

impl HandlerBuilder {
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    #[must_use]
    pub fn intercept(mut self, callback: InterceptCallback) -> Self {
        self.intercept = Some(callback);
        self
    }

    #[must_use]
    pub fn on_message(mut self, callback: MessageCallback) -> Self {
        self.on_message = Some(callback);
        self
    }

    #[must_use]
    pub fn build(self, looper: Looper) -> Handler {
        Handler {
            inner: Arc::new(HandlerInner {
                looper,
                is_async: self.is_async,
                intercept: self.intercept,
                on_message: self.on_message,
            }),
        }
    }
}

impl Handler {
    /// A plain, synchronous handler with no message callbacks bound to
    /// `looper`.
    #[must_use]
    pub fn new(looper: Looper) -> Self { Self::builder().build(looper) }

    #[must_use]
    pub fn builder() -> HandlerBuilder { HandlerBuilder::default() }

    #[must_use]
    pub fn looper(&self) -> &Looper { &self.inner.looper }

    #[must_use]
    pub fn is_async(&self) -> bool { self.inner.is_async }

    pub fn post(&self, callable: impl FnOnce() + Send + 'static) -> Result<EntryId, PostError> {
        self.post_delayed(callable, 0)
    }

    pub fn post_delayed(
        &self,
        callable: impl FnOnce() + Send + 'static,
        delay_ms: i64,
    ) -> Result<EntryId, PostError> {
        let clamped = clamp_delay(delay_ms);
        let when = self.inner.looper.clock().now_millis() + clamped;
        self.post_at_time(callable, when)
    }

    pub fn post_at_time(
        &self,
        callable: impl FnOnce() + Send + 'static,
        when_ms: i64,
    ) -> Result<EntryId, PostError> {
        let entry = Entry::new_task(Box::new(callable), self.inner.is_async, Some(self.clone()));
        self.post_entry(entry, when_ms)
    }

    pub fn post_at_front_of_queue(
        &self,
        callable: impl FnOnce() + Send + 'static,
    ) -> Result<EntryId, PostError> {
        self.post_at_time(callable, 0)
    }

    pub fn send_message(&self, what: i32, payload: Option<Box<dyn Any + Send>>) -> Result<EntryId, PostError> {
        self.send_message_delayed(what, payload, 0)
    }

    pub fn send_message_delayed(
        &self,
        what: i32,
        payload: Option<Box<dyn Any + Send>>,
        delay_ms: i64,
    ) -> Result<EntryId, PostError> {
        let clamped = clamp_delay(delay_ms);
        let when = self.inner.looper.clock().now_millis() + clamped;
        self.send_message_at_time(what, payload, when)
    }

    pub fn send_message_at_time(
        &self,
        what: i32,
        payload: Option<Box<dyn Any + Send>>,
        when_ms: i64,
    ) -> Result<EntryId, PostError> {
        let entry = Entry::new_message(what, payload, None, self.inner.is_async, self.clone());
        self.post_entry(entry, when_ms)
    }

    pub fn send_empty_message(&self, what: i32) -> Result<EntryId, PostError> {
        self.send_message(what, None)
    }

    #[must_use]
    pub fn post_barrier(&self) -> BarrierToken { self.inner.looper.queue().post_barrier() }

    pub fn remove_barrier(&self, token: BarrierToken) { self.inner.looper.queue().remove_barrier(token); }

    /// Removes and recycles every currently-queued entry targeting this
    /// handler for which `predicate` returns `true`.
    pub fn remove(&self, predicate: impl Fn(&Entry) -> bool) {
        self.inner.looper.queue().remove(|entry| is_own_entry(entry, self) && predicate(entry));
    }

    /// Posts `entry`. A post rejected because the queue is quitting is
    /// recoverable for ordinary queues, but fatal for a `SYSTEM` looper's
    /// queue (spec.md §7): a `SYSTEM` looper is never supposed to quit
    /// during normal operation, so a rejected post there indicates a
    /// lifecycle bug, not an expected race.
    fn post_entry(&self, entry: Entry, when_ms: i64) -> Result<EntryId, PostError> {
        let id = entry.id;
        match self.inner.looper.queue().post(entry, when_ms) {
            Ok(()) => {
                self.inner.looper.queue().wake();
                Ok(id)
            }
            Err(PostError::QueueIsQuitting) if self.inner.looper.flags().contains(LooperFlags::SYSTEM) => {
                panic!("{}", ProgrammingFault::PostToQuittingSystemQueue)
            }
            Err(err) => Err(err),
        }
    }

    /// Called by the dispatch loop for `Message`-kind entries. If the entry
    /// carries its own callable that runs instead of the message path. Else
    /// the interceptor runs first; unless it returns `true`, the fallback
    /// callback runs. Either way the entry is recycled once delivery is
    /// done.
    pub(crate) fn dispatch_message(&self, mut entry: Entry) {
        if let Some(callable) = entry.callable.take() {
            callable();
            entry.recycle();
            return;
        }
        let EntryKind::Message { what, payload } = std::mem::replace(&mut entry.kind, EntryKind::Task) else {
            entry.recycle();
            return;
        };
        let message = Message { what, payload: payload.as_deref() };
        let suppressed = self.inner.intercept.as_ref().is_some_and(|intercept| intercept(&message));
        if !suppressed {
            if let Some(on_message) = &self.inner.on_message {
                on_message(&message);
            }
        }
        entry.recycle();
    }
}

fn is_own_entry(entry: &Entry, handler: &Handler) -> bool {
    entry.target.as_ref().is_some_and(|target| Arc::ptr_eq(&target.inner, &handler.inner))
}

fn clamp_delay(delay_ms: i64) -> i64 {
    if delay_ms < 0 {
        tracing::trace!(delay_ms, "negative post delay clamped to 0");
        0
    } else {
        delay_ms
    }
}

/// Runs one dispatched entry to completion, catching any panic from user
/// code and forwarding it to `sink` rather than letting it unwind past this
/// call. Shared by the Looper's synchronous and async dispatch paths.
pub(crate) fn run_entry(mut entry: Entry, sink: &dyn ExceptionSink) {
    entry.finalize();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dispatch_once(entry)));
    if let Err(panic) = result {
        sink.handle(panic);
    }
}

fn dispatch_once(mut entry: Entry) {
    match &entry.kind {
        EntryKind::Barrier { .. } => {
            debug_assert!(false, "a barrier entry was promoted for dispatch");
        }
        EntryKind::Task => {
            if let Some(callable) = entry.callable.take() {
                run_callable(callable);
            }
            entry.recycle();
        }
        EntryKind::Message { .. } => {
            if let Some(handler) = entry.target.take() {
                handler.dispatch_message(entry);
            }
        }
    }
}

fn run_callable(callable: Callable) { callable(); }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::LooperFlags;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn message_without_own_callable_reaches_on_message_unless_intercepted() {
        let looper = Looper::new_default(LooperFlags::NONE);
        let seen = Arc::new(AtomicI32::new(0));
        let seen_cb = Arc::clone(&seen);
        let handler = Handler::builder()
            .on_message(Box::new(move |msg| { seen_cb.store(msg.what, Ordering::SeqCst); }))
            .build(looper.clone());
        handler.send_empty_message(7).unwrap();
        let entry = match looper.queue().next(looper.clock()) {
            crate::queue::NextOutcome::Success(entry) => entry,
            other => panic!("expected Success, got {other:?}"),
        };
        run_entry(entry, &crate::exception_sink::LoggingExceptionSink);
        looper.queue().clear_active();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn intercept_returning_true_suppresses_on_message() {
        let looper = Looper::new_default(LooperFlags::NONE);
        let fallback_ran = Arc::new(AtomicBool::new(false));
        let fallback_ran_cb = Arc::clone(&fallback_ran);
        let handler = Handler::builder()
            .intercept(Box::new(|_msg| true))
            .on_message(Box::new(move |_msg| fallback_ran_cb.store(true, Ordering::SeqCst)))
            .build(looper.clone());
        handler.send_empty_message(1).unwrap();
        let entry = match looper.queue().next(looper.clock()) {
            crate::queue::NextOutcome::Success(entry) => entry,
            other => panic!("expected Success, got {other:?}"),
        };
        run_entry(entry, &crate::exception_sink::LoggingExceptionSink);
        looper.queue().clear_active();
        assert!(!fallback_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn negative_delay_is_clamped_to_zero() {
        let looper = Looper::new_default(LooperFlags::NONE);
        let handler = Handler::new(looper.clone());
        let before = looper.clock().now_millis();
        handler.post_delayed(|| {}, -500).unwrap();
        let after = looper.clock().now_millis();
        match looper.queue().next(looper.clock()) {
            crate::queue::NextOutcome::Success(entry) => assert!(entry.when >= before && entry.when <= after),
            other => panic!("expected Success for zero-delay entry, got {other:?}"),
        }
        looper.queue().clear_active();
    }

    #[test]
    fn remove_only_drops_this_handlers_own_entries() {
        let looper = Looper::new_default(LooperFlags::NONE);
        let handler_a = Handler::new(looper.clone());
        let handler_b = Handler::new(looper.clone());
        handler_a.send_empty_message(1).unwrap();
        handler_b.send_empty_message(2).unwrap();
        handler_a.remove(|_| true);
        let remaining = Mutex::new(Vec::new());
        loop {
            match looper.queue().next(looper.clock()) {
                crate::queue::NextOutcome::Success(entry) => {
                    if let EntryKind::Message { what, .. } = entry.kind {
                        remaining.lock().unwrap().push(what);
                    }
                    looper.queue().clear_active();
                }
                _ => break,
            }
        }
        assert_eq!(*remaining.lock().unwrap(), vec![2]);
    }
}
