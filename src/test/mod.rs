//! Test support - a simulated IEC bus.
//!
//! The device side runs the real protocol code, through a [`SplitLine`] per
//! IEC line backed by simulated pins.  The other end of the bus is a
//! scripted [`Host`], standing in for a C64.
//!
//! Time is simulated too.  It only moves when the device reads a line (one
//! microsecond per read) or blocks.  The host script is stepped every
//! simulated microsecond, so device and host interleave deterministically.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html


pub use capture::Capture;
pub use host::Host;
pub use recorder::Recorder;

use core::convert::Infallible;
use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::bus::IecBus;
use crate::protocol::{AtnMode, IecPort, Line, SplitLine};
use crate::util::time::TimeSource;

// Any test still running after this much simulated time has hung
const SIM_TIME_LIMIT_US: u64 = 60_000_000;

// How long the bus must be quiet, once the host script is finished, before
// Sim::run() returns
const SETTLE_US: u64 = 1_000;

pub(crate) fn line_index(line: Line) -> usize {
    match line {
        Line::Atn => 0,
        Line::Clock => 1,
        Line::Data => 2,
        Line::Reset => 3,
        Line::Srq => 4,
    }
}

/// The shared state of the simulated bus.
pub struct World {
    now_us: u64,
    device: [bool; 5],
    host: Host,
    keep_alives: u32,
}

impl World {
    fn new() -> Self {
        Self {
            now_us: 0,
            device: [false; 5],
            host: Host::new(),
            keep_alives: 0,
        }
    }

    // Advance time by a microsecond, and let the host react.
    fn tick(&mut self) {
        self.now_us += 1;
        assert!(
            self.now_us < SIM_TIME_LIMIT_US,
            "simulation ran for too long"
        );
        self.host.step(self.now_us, &self.device);
    }

    // Wired-AND - the line is low if anyone pulls it.
    fn is_pulled(&self, line: Line) -> bool {
        let index = line_index(line);
        self.device[index] || self.host.is_holding(line)
    }
}

/// A simulated input pin.  Reads low when the line is pulled.
pub struct SimInput {
    world: Rc<RefCell<World>>,
    line: Line,
}

impl ErrorType for SimInput {
    type Error = Infallible;
}

impl InputPin for SimInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_low()?)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        let mut world = self.world.borrow_mut();
        world.tick();
        Ok(world.is_pulled(self.line))
    }
}

/// A simulated output pin, inverted as on the pico1541 boards - high pulls
/// the line.
pub struct SimOutput {
    world: Rc<RefCell<World>>,
    line: Line,
}

impl ErrorType for SimOutput {
    type Error = Infallible;
}

impl OutputPin for SimOutput {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.world.borrow_mut().device[line_index(self.line)] = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.world.borrow_mut().device[line_index(self.line)] = false;
        Ok(())
    }
}

/// The simulated clock.
pub struct SimClock {
    world: Rc<RefCell<World>>,
}

impl TimeSource for SimClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.world.borrow().now_us)
    }

    fn block_for(&mut self, duration: Duration) {
        let mut world = self.world.borrow_mut();
        for _ in 0..duration.as_micros() {
            world.tick();
        }
    }

    fn keep_alive(&mut self) {
        self.world.borrow_mut().keep_alives += 1;
    }
}

pub type SimLine = SplitLine<SimInput, SimOutput>;
pub type SimBus<'a> = IecBus<'a, SimLine, SimClock>;

/// A simulated bus, with a scripted host attached.
pub struct Sim {
    world: Rc<RefCell<World>>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            world: Rc::new(RefCell::new(World::new())),
        }
    }

    fn line(&self, line: Line) -> SimLine {
        SplitLine::new(
            SimInput {
                world: self.world.clone(),
                line,
            },
            SimOutput {
                world: self.world.clone(),
                line,
            },
        )
    }

    /// The device's connection to the bus.
    pub fn port(&self) -> IecPort<SimLine, SimClock> {
        IecPort::new(
            self.line(Line::Atn),
            self.line(Line::Clock),
            self.line(Line::Data),
            self.line(Line::Reset),
            Some(self.line(Line::Srq)),
            SimClock {
                world: self.world.clone(),
            },
        )
    }

    /// The host, to add to its script or inspect what it saw.  Don't hold
    /// on to this while the device is running.
    pub fn host(&self) -> RefMut<'_, Host> {
        RefMut::map(self.world.borrow_mut(), |world| &mut world.host)
    }

    /// The current simulated time, in microseconds.
    pub fn now_us(&self) -> u64 {
        self.world.borrow().now_us
    }

    /// How many times the device called `keep_alive()`.
    pub fn keep_alives(&self) -> u32 {
        self.world.borrow().keep_alives
    }

    /// Let time pass, without the device doing anything, until the host
    /// script is finished.
    pub fn settle(&self) {
        let mut world = self.world.borrow_mut();
        while !world.host.is_idle() {
            world.tick();
        }
    }

    /// Service the bus until the host script is finished and the bus has
    /// been quiet for a while.
    ///
    /// Returns the mode from every `service()` call that did something.
    pub fn run(&self, bus: &mut SimBus<'_>) -> Vec<AtnMode> {
        let mut modes = Vec::new();
        let mut quiet_since = None;
        loop {
            let mode = bus.service();
            if mode != AtnMode::Idle {
                modes.push(mode);
            }

            let now = self.now_us();
            if self.world.borrow().host.is_idle() {
                let since = *quiet_since.get_or_insert(now);
                if now - since >= SETTLE_US {
                    break;
                }
            } else {
                quiet_since = None;
            }
        }
        modes
    }
}
