// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Looper`]: the thread-affine dispatch loop that drains a
//! [`crate::queue::Queue`] (spec.md §4.3). One `Looper` is meant to be run on
//! exactly one thread for its whole life; [`Looper::spawn`] is the usual way
//! to give it one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::LooperConfig;
use crate::error::ProgrammingFault;
use crate::exception_sink::{ExceptionSink, LoggingExceptionSink};
use crate::executor::{ParallelExecutor, ThreadPoolExecutor};
use crate::handler::run_entry;
use crate::queue::{NextOutcome, Queue};
use crate::registry;

/// Every iteration of the dispatch loop is clamped to at least this many
/// milliseconds of wall-clock budget before the overload/forced-yield checks
/// run, matching the cadence spec.md §4.3 describes for idle/stalled ticks.
const MIN_ITERATION_MILLIS: i64 = 50;

/// Minimum spacing between consecutive overload warnings, so a looper stuck
/// over threshold doesn't spam the log every iteration.
const OVERLOAD_WARN_INTERVAL_MILLIS: i64 = 15_000;

/// Minimum spacing between forced cooperative yields once overloaded.
const FORCED_YIELD_INTERVAL_MILLIS: i64 = 1_000;

const FORCED_YIELD_MILLIS: u64 = 20;

/// EWMA smoothing factor applied to each iteration's wall-clock time to
/// produce [`Looper::average_polled_millis`]. Spec.md's own
/// `(min-max)/2` formula is flagged as a known-buggy placeholder (spec.md
/// §4.3 note); this crate uses the conventional alpha = 1/8 smoothing factor
/// instead, the same constant widely used for TCP RTT estimation.
const OVERLOAD_EWMA_ALPHA: f64 = 0.125;

/// Bit flags configuring a [`Looper`] at construction time. Immutable for
/// the life of the looper: attempting to change them after
/// [`Looper::run`] has started returns
/// [`ProgrammingFault::FlagsMutatedWhileRunning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LooperFlags(u8);

impl LooperFlags {
    pub const NONE: Self = Self(0);
    /// `next()` blocks (via condvar wait) instead of returning `EMPTY`/`WAITING`.
    pub const BLOCKING: Self = Self(1 << 0);
    /// Every entry dispatches through the [`crate::executor::ParallelExecutor`]
    /// regardless of its own `async` flag.
    pub const ASYNC: Self = Self(1 << 1);
    /// Marks a looper the process depends on; quitting it off its primary
    /// thread or destroying it is a [`ProgrammingFault`].
    pub const SYSTEM: Self = Self(1 << 2);
    /// Marks a looper hosting third-party/plugin callbacks; same destroy
    /// protections as `SYSTEM`.
    pub const PLUGIN: Self = Self(1 << 3);
    /// Quits automatically the first time the queue goes empty.
    pub const AUTO_QUIT: Self = Self(1 << 4);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    #[must_use]
    pub const fn union(self, other: Self) -> Self { Self(self.0 | other.0) }
}

impl std::ops::BitOr for LooperFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { self.union(rhs) }
}

const STATE_POLLING: u8 = 1 << 0;
const STATE_STALLED: u8 = 1 << 1;

/// Opaque handle returned by [`Looper::add_idle_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleHandlerId(u64);

/// Runs once per idle/stalled tick. Returning `false` deregisters it.
pub type IdleHandler = Box<dyn FnMut(&Looper) -> bool + Send>;

static NEXT_IDLE_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

struct LooperInner {
    queue: Queue,
    flags: LooperFlags,
    state: AtomicU8,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ParallelExecutor>,
    exception_sink: Arc<dyn ExceptionSink>,
    config: LooperConfig,
    owning_thread: Mutex<Option<ThreadId>>,
    joined: AtomicBool,
    idle_handlers: Mutex<Vec<(IdleHandlerId, IdleHandler)>>,
    last_polled_millis: AtomicI64,
    average_polled_millis: Mutex<f64>,
    is_overloaded: AtomicBool,
    last_overload_warn_millis: AtomicI64,
    last_forced_yield_millis: AtomicI64,
}

/// A thread-affine dispatch loop. Cheaply cloneable: every clone shares the
/// same underlying queue, state, and collaborators.
#[derive(Clone)]
pub struct Looper {
    inner: Arc<LooperInner>,
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("flags", &self.inner.flags)
            .field("state", &self.inner.state.load(Ordering::SeqCst))
            .field("queue", &self.inner.queue)
            .finish()
    }
}

/// Constructs a [`Looper`] with explicit collaborators, falling back to the
/// defaults spec.md §6 describes for anything not set.
pub struct LooperBuilder {
    flags: LooperFlags,
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn ParallelExecutor>>,
    exception_sink: Option<Arc<dyn ExceptionSink>>,
    config: LooperConfig,
}

impl fmt::Debug for LooperBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperBuilder").field("flags", &self.flags).field("config", &self.config).finish()
    }
}

impl LooperBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ParallelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn exception_sink(mut self, sink: Arc<dyn ExceptionSink>) -> Self {
        self.exception_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(mut self, config: LooperConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> Looper {
        Looper {
            inner: Arc::new(LooperInner {
                queue: Queue::new(self.flags.contains(LooperFlags::BLOCKING)),
                flags: self.flags,
                state: AtomicU8::new(0),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                executor: self.executor.unwrap_or_else(|| Arc::new(ThreadPoolExecutor)),
                exception_sink: self.exception_sink.unwrap_or_else(|| Arc::new(LoggingExceptionSink)),
                config: self.config,
                owning_thread: Mutex::new(None),
                joined: AtomicBool::new(false),
                idle_handlers: Mutex::new(Vec::new()),
                last_polled_millis: AtomicI64::new(0),
                average_polled_millis: Mutex::new(0.0),
                is_overloaded: AtomicBool::new(false),
                last_overload_warn_millis: AtomicI64::new(i64::MIN / 2),
                last_forced_yield_millis: AtomicI64::new(i64::MIN / 2),
            }),
        }
    }
}

impl Looper {
    #[must_use]
    pub fn builder(flags: LooperFlags) -> LooperBuilder {
        LooperBuilder { flags, clock: None, executor: None, exception_sink: None, config: LooperConfig::default() }
    }

    /// A looper with every default collaborator from spec.md §6.
    #[must_use]
    pub fn new_default(flags: LooperFlags) -> Self { Self::builder(flags).build() }

    #[must_use]
    pub fn queue(&self) -> &Queue { &self.inner.queue }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock { self.inner.clock.as_ref() }

    #[must_use]
    pub fn flags(&self) -> LooperFlags { self.inner.flags }

    #[must_use]
    pub fn is_polling(&self) -> bool { self.inner.state.load(Ordering::SeqCst) & STATE_POLLING != 0 }

    #[must_use]
    pub fn is_stalled(&self) -> bool { self.inner.state.load(Ordering::SeqCst) & STATE_STALLED != 0 }

    #[must_use]
    pub fn is_quitting(&self) -> bool { self.inner.queue.is_quitting() }

    #[must_use]
    pub fn is_overloaded(&self) -> bool { self.inner.is_overloaded.load(Ordering::SeqCst) }

    #[must_use]
    pub fn last_polled_millis(&self) -> i64 { self.inner.last_polled_millis.load(Ordering::SeqCst) }

    #[must_use]
    pub fn average_polled_millis(&self) -> f64 { *self.inner.average_polled_millis.lock().unwrap() }

    pub fn add_idle_handler(&self, handler: IdleHandler) -> IdleHandlerId {
        let id = IdleHandlerId(NEXT_IDLE_HANDLER_ID.fetch_add(1, Ordering::SeqCst));
        self.inner.idle_handlers.lock().unwrap().push((id, handler));
        id
    }

    pub fn remove_idle_handler(&self, id: IdleHandlerId) {
        self.inner.idle_handlers.lock().unwrap().retain(|(handler_id, _)| *handler_id != id);
    }

    /// Requests a graceful quit: already-due entries still drain; entries
    /// that would never become due are recycled once the loop notices.
    /// `SYSTEM` loopers refuse this off their primary thread.
    pub fn quit_safely(&self) -> Result<(), ProgrammingFault> {
        self.check_quit_allowed()?;
        self.inner.queue.quit(false, self.inner.clock.now_millis());
        Ok(())
    }

    /// Requests an immediate quit: every currently-queued entry is recycled
    /// without dispatch. `SYSTEM` loopers refuse this off their primary
    /// thread.
    pub fn quit_and_destroy(&self) -> Result<(), ProgrammingFault> {
        self.check_quit_allowed()?;
        self.inner.queue.quit(true, self.inner.clock.now_millis());
        Ok(())
    }

    fn check_quit_allowed(&self) -> Result<(), ProgrammingFault> {
        if !self.inner.flags.contains(LooperFlags::SYSTEM) && !self.inner.flags.contains(LooperFlags::PLUGIN) {
            return Ok(());
        }
        let owner = *self.inner.owning_thread.lock().unwrap();
        match owner {
            Some(owner) if owner == std::thread::current().id() => Ok(()),
            _ => Err(ProgrammingFault::QuitSystemLooperOffThread),
        }
    }

    /// Deregisters this looper from the process registry. Fails if the
    /// dispatch loop is still polling, or if this is a `SYSTEM`/`PLUGIN`
    /// looper (those are never meant to be torn down).
    pub fn destroy(&self) -> Result<(), ProgrammingFault> {
        if self.is_polling() {
            return Err(ProgrammingFault::DestroyWhileRunning);
        }
        if self.inner.flags.contains(LooperFlags::SYSTEM) || self.inner.flags.contains(LooperFlags::PLUGIN) {
            return Err(ProgrammingFault::DestroyWhileRunning);
        }
        registry::unregister(self);
        Ok(())
    }

    /// Spawns a new OS thread named `name` that runs [`Looper::run`] on it,
    /// registering that thread as this looper's owner. Returns a handle that
    /// guards against double-join ([`ProgrammingFault::JoinedTwice`]).
    pub fn spawn(self, name: impl Into<String>) -> std::io::Result<LooperThreadHandle> {
        let looper = self.clone();
        let handle = std::thread::Builder::new().name(name.into()).spawn(move || looper.run())?;
        Ok(LooperThreadHandle { looper: self, handle: Some(handle) })
    }

    /// Runs the dispatch loop on the calling thread until quitting and
    /// drained. Intended to be called once, from the thread meant to host
    /// this looper for its whole life.
    pub fn run(&self) {
        {
            let mut owner = self.inner.owning_thread.lock().unwrap();
            if owner.is_none() {
                *owner = Some(std::thread::current().id());
            }
        }
        registry::register(std::thread::current().id(), self.clone());
        self.inner.state.fetch_or(STATE_POLLING, Ordering::SeqCst);

        loop {
            let loop_start = self.inner.clock.now_millis();
            let outcome = self.inner.queue.next(self.inner.clock.as_ref());

            match outcome {
                NextOutcome::Success(entry) => {
                    self.inner.state.fetch_and(!STATE_STALLED, Ordering::SeqCst);
                    let dispatch_async = entry.is_async || self.inner.flags.contains(LooperFlags::ASYNC);
                    if dispatch_async {
                        self.inner.queue.clear_active();
                        let sink = Arc::clone(&self.inner.exception_sink);
                        let looper = self.clone();
                        self.inner.executor.submit(Box::new(move || {
                            let worker_tid = std::thread::current().id();
                            registry::register(worker_tid, looper.clone());
                            run_entry(entry, sink.as_ref());
                            registry::remove_alias(worker_tid);
                        }));
                    } else {
                        run_entry(entry, self.inner.exception_sink.as_ref());
                        self.inner.queue.clear_active();
                    }
                }
                NextOutcome::Empty => {
                    self.inner.state.fetch_and(!STATE_STALLED, Ordering::SeqCst);
                    self.run_idle_handlers();
                    if self.inner.flags.contains(LooperFlags::AUTO_QUIT) {
                        self.inner.queue.quit(false, self.inner.clock.now_millis());
                    }
                    std::thread::sleep(Duration::from_millis(MIN_ITERATION_MILLIS as u64));
                }
                NextOutcome::Stalled => {
                    self.inner.state.fetch_or(STATE_STALLED, Ordering::SeqCst);
                    self.run_idle_handlers();
                    std::thread::sleep(Duration::from_millis(MIN_ITERATION_MILLIS as u64));
                }
                NextOutcome::Waiting(next_when) => {
                    self.inner.state.fetch_and(!STATE_STALLED, Ordering::SeqCst);
                    self.run_idle_handlers();
                    let now = self.inner.clock.now_millis();
                    let due_in = (next_when - now).clamp(0, MIN_ITERATION_MILLIS);
                    std::thread::sleep(Duration::from_millis(due_in as u64));
                }
            }

            let elapsed = {
                let raw = self.inner.clock.now_millis() - loop_start;
                if raw < 0 {
                    tracing::warn!(regression_millis = -raw, "looper clock ran backwards; clamping to 0");
                    0
                } else {
                    raw
                }
            };
            self.inner.last_polled_millis.store(elapsed, Ordering::SeqCst);

            // Every iteration yields the rest of MIN_ITERATION_MILLIS, not
            // just the idle/stalled/waiting ones; the Empty/Stalled/Waiting
            // arms above already slept past the threshold, so this only bites
            // for Success.
            if elapsed < MIN_ITERATION_MILLIS {
                std::thread::sleep(Duration::from_millis((MIN_ITERATION_MILLIS - elapsed) as u64));
            }

            self.update_average_and_overload(elapsed);

            if self.is_quitting() && self.inner.queue.is_idle() {
                break;
            }
        }

        self.inner.state.fetch_and(!STATE_POLLING, Ordering::SeqCst);
    }

    fn update_average_and_overload(&self, elapsed: i64) {
        let average = {
            let mut average_guard = self.inner.average_polled_millis.lock().unwrap();
            *average_guard += OVERLOAD_EWMA_ALPHA * (elapsed as f64 - *average_guard);
            *average_guard
        };

        let threshold = self.inner.config.average_overload_threshold_ms as f64;
        let overloaded = average > threshold;
        self.inner.is_overloaded.store(overloaded, Ordering::SeqCst);
        if !overloaded {
            return;
        }

        let now = self.inner.clock.now_millis();
        if self.inner.config.warn_on_overload {
            let last_warn = self.inner.last_overload_warn_millis.load(Ordering::SeqCst);
            if now - last_warn >= OVERLOAD_WARN_INTERVAL_MILLIS {
                tracing::warn!(average_polled_millis = average, "looper can't keep up");
                self.inner.last_overload_warn_millis.store(now, Ordering::SeqCst);
            }
        }

        let last_yield = self.inner.last_forced_yield_millis.load(Ordering::SeqCst);
        if now - last_yield >= FORCED_YIELD_INTERVAL_MILLIS {
            std::thread::sleep(Duration::from_millis(FORCED_YIELD_MILLIS));
            self.inner.last_forced_yield_millis.store(now, Ordering::SeqCst);
        }
    }

    fn run_idle_handlers(&self) {
        let pending = {
            let mut guard = self.inner.idle_handlers.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        let mut retained = Vec::with_capacity(pending.len());
        for (id, mut handler) in pending {
            if handler(self) {
                retained.push((id, handler));
            }
        }
        let mut guard = self.inner.idle_handlers.lock().unwrap();
        retained.append(&mut guard);
        *guard = retained;
    }
}

/// Owned handle to a looper running on a thread spawned by [`Looper::spawn`].
pub struct LooperThreadHandle {
    looper: Looper,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for LooperThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperThreadHandle").field("looper", &self.looper).finish()
    }
}

impl LooperThreadHandle {
    #[must_use]
    pub fn looper(&self) -> &Looper { &self.looper }

    /// Joins the spawned thread. Returns
    /// [`ProgrammingFault::JoinedTwice`] if already joined.
    pub fn join(mut self) -> Result<(), ProgrammingFault> {
        if self.looper.inner.joined.swap(true, Ordering::SeqCst) {
            return Err(ProgrammingFault::JoinedTwice);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
