//! Time sources for reading ages.
//!
//! Ages are computed from a monotonic seconds counter rather than the
//! seconds-of-day wall clock, so a reading taken just before midnight still
//! ages correctly after it.

use std::time::Instant;

pub trait Clock {
    /// Seconds elapsed since an arbitrary fixed origin. Never decreases.
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualClock {
    now: u64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: start }
    }

    pub fn set(&mut self, now: u64) {
        debug_assert!(now >= self.now, "clock moved backwards from {} to {}", self.now, now);
        self.now = now;
    }

    pub fn advance(&mut self, seconds: u64) {
        self.now = self.now.saturating_add(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now
    }
}
