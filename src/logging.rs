// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The logging-sink collaborator (spec.md §6): severities `fine`, `info`,
//! `warning`, `severe`, mapped onto `tracing`'s `trace`, `info`, `warn`,
//! `error` levels respectively. [`crate::looper::Looper`] and
//! [`crate::queue::Queue`] call the `tracing` macros directly at their call
//! sites; this module only owns subscriber installation, mirroring the
//! split between `tracing_config.rs` (config) and `tracing_init.rs`
//! (installation) in this workspace's `core::log` module.

use tracing_core::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Where the global/thread-local subscriber writes formatted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    Stdout,
    Stderr,
}

/// Minimal tracing configuration for this crate's examples and tests.
///
/// Unlike the full `core::log::TracingConfig` this workspace carries
/// elsewhere (which adds rolling file appenders, a custom event formatter,
/// and a `SharedWriter` variant for async readline integration), this crate
/// has no terminal-rendering concerns, so only the writer target and level
/// filter are configurable.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub writer: Writer,
    pub level_filter: LevelFilter,
}

impl Default for TracingConfig {
    fn default() -> Self { Self { writer: Writer::Stderr, level_filter: LevelFilter::INFO } }
}

impl TracingConfig {
    /// Installs this configuration as the process-wide default subscriber.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been installed — matching
    /// `tracing`'s own contract that there can be only one, and it can't be
    /// replaced.
    pub fn install_global(self) {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.level_filter)
            .with_writer(writer_fn(self.writer))
            .finish();
        subscriber.init();
    }

    /// Installs this configuration as a thread-local default subscriber,
    /// scoped to the returned guard's lifetime. Useful for tests that want
    /// isolated log capture without fighting over the single global
    /// subscriber slot.
    #[must_use]
    pub fn install_thread_local(self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.level_filter)
            .with_writer(writer_fn(self.writer))
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

fn writer_fn(writer: Writer) -> fn() -> Box<dyn std::io::Write> {
    match writer {
        Writer::Stdout => || Box::new(std::io::stdout()) as Box<dyn std::io::Write>,
        Writer::Stderr => || Box::new(std::io::stderr()) as Box<dyn std::io::Write>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_install_does_not_panic_and_can_be_dropped() {
        let guard = TracingConfig::default().install_thread_local();
        tracing::info!("hello from test");
        drop(guard);
    }
}
