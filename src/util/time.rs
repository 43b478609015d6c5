//! This file implements the timing primitives used by the IEC protocol.
//!
//! All protocol code reads the time through the [`TimeSource`] trait, rather than
//! calling `embassy_time::Instant::now()` directly.  On the Pico this is
//! backed by the embassy time driver ([`SystemClock`]).  On the host it is
//! backed by a simulated clock, which lets the protocol be tested without
//! any real hardware or real time passing.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

/// A source of time for the protocol engine.
pub trait TimeSource {
    /// The current time.
    fn now(&self) -> Instant;

    /// Block (busy wait) for the duration given.  Never yields - the IEC
    /// timings are too tight to let anything else run.
    fn block_for(&mut self, duration: Duration);

    /// Called at least once per byte transferred.  A long transfer can run
    /// for many seconds inside a single `service()` call, so firmware uses
    /// this to feed its watchdog.
    #[inline]
    fn keep_alive(&mut self) {}

    /// The deadline `timeout` from now.
    #[inline]
    fn deadline(&self, timeout: Duration) -> Instant {
        self.now() + timeout
    }

    /// Whether `deadline` has passed.
    #[inline]
    fn expired(&self, deadline: Instant) -> bool {
        self.now() >= deadline
    }
}

/// Time source backed by the embassy time driver.
#[cfg(feature = "rp")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "rp")]
impl TimeSource for SystemClock {
    #[inline(always)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline(always)]
    fn block_for(&mut self, duration: Duration) {
        block_for(duration);
    }
}

/// Function to block until a specific instant.  This is similar to the
/// embassy-time::Delay::block_for function.
///
/// We always inline it to reduce function call/return overhead, as this is
/// typically used in timing critical functions
#[cfg(feature = "rp")]
#[inline(always)]
pub fn block_until(expires: Instant) {
    while Instant::now() < expires {}
}

/// Function to block for a specific Duration.
#[cfg(feature = "rp")]
#[inline(always)]
pub fn block_for(duration: Duration) {
    block_until(Instant::now() + duration);
}
