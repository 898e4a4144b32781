// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The monotonic-clock collaborator. Every due-time (`when`) the Looper core
//! schedules against is measured by a [`Clock`]; spec.md §6 describes this as
//! an external interface with two interchangeable accessors
//! (`nowMillis`/`uptimeMillis`) — here both map onto a single monotonic
//! reading so there's no risk of the two diverging.

use std::sync::OnceLock;
use std::time::Instant;

/// A monotonic-millisecond time source. Implementations must never go
/// backwards; [`crate::looper::Looper`] treats a negative `elapsed` as an
/// environmental fault (logged, clamped to zero) rather than trusting it.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since some fixed, implementation-defined epoch.
    /// Only differences between two calls are meaningful.
    fn now_millis(&self) -> i64;
}

/// Default [`Clock`] backed by [`std::time::Instant`], which is guaranteed
/// monotonic on every platform Rust supports.
#[derive(Debug, Default)]
pub struct SystemClock;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let elapsed = process_start().elapsed();
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_non_decreasing() {
        let clock = SystemClock;
        let a = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
