//! Engine time source.
//!
//! All timestamps inside the engine (item access time and expiration) are
//! seconds relative to the moment the clock was created. An expiration time
//! of 0 means "never expires".

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use clocksource::coarse::Instant;

/// Relative-seconds clock shared by everything in one engine.
#[derive(Clone)]
pub struct Clock {
    inner: ClockInner,
}

#[derive(Clone)]
enum ClockInner {
    System { started: Instant },
    Manual(Arc<AtomicU32>),
}

impl Clock {
    /// A clock driven by the coarse system clock, starting at 0 now.
    pub fn system() -> Self {
        Self {
            inner: ClockInner::System {
                started: Instant::now(),
            },
        }
    }

    /// A clock that only moves when [`Clock::advance`] or [`Clock::set`] is
    /// called. Clones share the same time.
    pub fn manual() -> Self {
        Self {
            inner: ClockInner::Manual(Arc::new(AtomicU32::new(0))),
        }
    }

    /// Seconds elapsed since the clock was created.
    #[inline]
    pub fn now(&self) -> u32 {
        match &self.inner {
            ClockInner::System { started } => Instant::now().duration_since(*started).as_secs(),
            ClockInner::Manual(now) => now.load(Ordering::Relaxed),
        }
    }

    /// Move a manual clock forward. No effect on a system clock.
    pub fn advance(&self, secs: u32) {
        if let ClockInner::Manual(now) = &self.inner {
            now.fetch_add(secs, Ordering::Relaxed);
        }
    }

    /// Set a manual clock. No effect on a system clock.
    pub fn set(&self, secs: u32) {
        if let ClockInner::Manual(now) = &self.inner {
            now.store(secs, Ordering::Relaxed);
        }
    }

    /// Whether this is a manual clock.
    pub fn is_manual(&self) -> bool {
        matches!(self.inner, ClockInner::Manual(_))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_manual() { "manual" } else { "system" };
        f.debug_struct("Clock")
            .field("kind", &kind)
            .field("now", &self.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = Clock::manual();
        assert_eq!(clock.now(), 0);
        clock.advance(5);
        assert_eq!(clock.now(), 5);

        let shared = clock.clone();
        shared.advance(10);
        assert_eq!(clock.now(), 15);

        clock.set(3);
        assert_eq!(shared.now(), 3);
    }

    #[test]
    fn test_system_clock_starts_near_zero() {
        let clock = Clock::system();
        assert!(clock.now() <= 1);
        clock.advance(100);
        assert!(clock.now() <= 1);
        assert!(!clock.is_manual());
    }
}
