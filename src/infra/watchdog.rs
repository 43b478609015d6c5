//! Contains the hardware watchdog handling.
//!
//! There is only a single thread of execution to police - the main loop
//! servicing the bus.  A LOAD or SAVE runs its whole data phase inside one
//! `service()` call, so the watchdog is fed by the protocol engine itself,
//! once per byte, through [`WatchdogClock`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::peripherals::WATCHDOG as P_RpWatchdog;
use embassy_rp::watchdog::Watchdog as RpWatchdog;
use embassy_time::{Duration, Instant};

use crate::constants::WATCHDOG_TIMER;
use crate::util::time::{SystemClock, TimeSource};

pub struct Watchdog {
    /// The hardware watchdog object
    hw_watchdog: RpWatchdog,
}

impl Watchdog {
    pub fn new(p_watchdog: P_RpWatchdog) -> Self {
        Self {
            hw_watchdog: RpWatchdog::new(p_watchdog),
        }
    }

    pub fn start(&mut self) {
        self.hw_watchdog.start(WATCHDOG_TIMER);
        info!("Watchdog started");
    }

    #[inline(always)]
    pub fn feed(&mut self) {
        self.hw_watchdog.feed();
    }
}

/// The firmware's time source - the system clock, feeding the watchdog
/// whenever the protocol engine makes progress.
pub struct WatchdogClock {
    clock: SystemClock,
    watchdog: Watchdog,
}

impl WatchdogClock {
    /// Takes a started watchdog.
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            clock: SystemClock,
            watchdog,
        }
    }
}

impl TimeSource for WatchdogClock {
    #[inline(always)]
    fn now(&self) -> Instant {
        self.clock.now()
    }

    #[inline(always)]
    fn block_for(&mut self, duration: Duration) {
        self.clock.block_for(duration);
    }

    #[inline(always)]
    fn keep_alive(&mut self) {
        self.watchdog.feed();
    }
}
