// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error types for the Looper subsystem. See [`ProgrammingFault`] for the
//! fatal, process-terminating class and [`PostError`] for the recoverable
//! class returned from [`crate::queue::Queue::post`] and the
//! [`crate::handler::Handler`] posting methods.

/// Programming faults: violations of the Looper contract that are never
/// meant to be handled by caller code. These are surfaced as `Err` so tests
/// can assert on them without aborting the process, but production call
/// sites are expected to `.unwrap()` or propagate and crash — the contract
/// was already broken by the time one of these is constructed.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ProgrammingFault {
    /// A `SYSTEM`-flagged queue rejected a post because it is quitting.
    #[error("posted to a quitting SYSTEM queue")]
    #[diagnostic(
        code(r3bl_looper::post_to_quitting_system_queue),
        help("SYSTEM loopers never quit during normal operation; this indicates a \
              lifecycle bug in the caller")
    )]
    PostToQuittingSystemQueue,

    /// `Looper::quit` was called for a `SYSTEM` looper from a thread other
    /// than its designated primary thread.
    #[error("quit() called on a SYSTEM looper from a non-primary thread")]
    #[diagnostic(
        code(r3bl_looper::quit_system_looper_off_thread),
        help("only the primary thread may quit a SYSTEM looper")
    )]
    QuitSystemLooperOffThread,

    /// Flags were mutated after the dispatch loop had already started.
    #[error("looper flags mutated while the dispatch loop was running")]
    #[diagnostic(code(r3bl_looper::flags_mutated_while_running))]
    FlagsMutatedWhileRunning,

    /// The dispatch loop was joined a second time.
    #[error("looper thread joined twice")]
    #[diagnostic(code(r3bl_looper::joined_twice))]
    JoinedTwice,

    /// `destroy()` was called while the loop was still running.
    #[error("destroy() called on a running looper")]
    #[diagnostic(
        code(r3bl_looper::destroy_while_running),
        help("call quit() or quit_safely() and join the thread before destroy()")
    )]
    DestroyWhileRunning,
}

/// Recoverable post failures. Returned as `Err` from [`crate::queue::Queue::post`]
/// and forwarded by [`crate::handler::Handler`]; never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum PostError {
    /// The queue is quitting and is not `SYSTEM`-flagged, so the post is
    /// silently rejected rather than treated as a programming fault.
    #[error("queue is quitting; entry was recycled instead of posted")]
    #[diagnostic(code(r3bl_looper::queue_is_quitting))]
    QueueIsQuitting,
}
