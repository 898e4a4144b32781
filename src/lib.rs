// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A thread-affinity message loop: an ordered, time-scheduled task queue
//! with barrier/stall synchronization, a [`handler::Handler`] posting
//! facade, overload detection, and a cooperative quit protocol.
//!
//! One [`looper::Looper`] is meant to run for the whole life of exactly one
//! OS thread. Other threads talk to it exclusively through a
//! [`handler::Handler`], which posts [`entry::Entry`] values onto the
//! looper's [`queue::Queue`]; the looper's own thread drains that queue in
//! order and dispatches each entry, either inline or — for entries marked
//! `async`, or for loopers built with [`looper::LooperFlags::ASYNC`] — on a
//! [`executor::ParallelExecutor`] worker thread.
//!
//! ```no_run
//! use r3bl_looper::handler::Handler;
//! use r3bl_looper::looper::{Looper, LooperFlags};
//!
//! let looper = Looper::new_default(LooperFlags::AUTO_QUIT);
//! let handler = Handler::new(looper.clone());
//! handler.post(|| println!("ran on the looper's thread")).unwrap();
//! looper.run();
//! ```

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod exception_sink;
pub mod executor;
pub mod handler;
pub mod id;
pub mod logging;
pub mod looper;
pub mod queue;
pub mod registry;

pub use clock::{Clock, SystemClock};
pub use config::LooperConfig;
pub use entry::{Callable, Entry, EntryKind};
pub use error::{PostError, ProgrammingFault};
pub use exception_sink::{ExceptionSink, LoggingExceptionSink};
pub use executor::{ParallelExecutor, ThreadPoolExecutor};
pub use handler::{Handler, HandlerBuilder, Message};
pub use id::{BarrierToken, EntryId};
pub use looper::{IdleHandler, IdleHandlerId, Looper, LooperBuilder, LooperFlags, LooperThreadHandle};
pub use queue::{NextOutcome, Queue};
