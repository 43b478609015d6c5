//! This file implements the IEC line driver - the lowest layer of the
//! protocol engine.
//!
//! IEC lines are open collector and active low.  A line is "pulled" (true,
//! asserted) if any device on the bus drives it low, and "released" (false)
//! otherwise, when the pull-ups take it high.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use core::convert::Infallible;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::{InputPin, OutputPin};

use crate::util::time::TimeSource;

/// The IEC bus lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    Atn,
    Clock,
    Data,
    Reset,
    Srq,
}

/// The state of a line, as seen on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineState {
    /// Asserted - driven low by at least one device
    Pulled,
    /// Not asserted - held high by the pull-ups
    Released,
}

impl LineState {
    #[must_use]
    pub fn is_pulled(self) -> bool {
        self == LineState::Pulled
    }
}

impl From<bool> for LineState {
    fn from(pulled: bool) -> Self {
        if pulled {
            LineState::Pulled
        } else {
            LineState::Released
        }
    }
}

bitflags! {
    /// A set of IEC lines.  The bit values match the pico1541/xum1541
    /// `IEC_*` masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lines: u8 {
        const DATA = 0x01;
        const CLOCK = 0x02;
        const ATN = 0x04;
        const RESET = 0x08;
        const SRQ = 0x10;
    }
}

impl From<Line> for Lines {
    fn from(line: Line) -> Self {
        match line {
            Line::Atn => Lines::ATN,
            Line::Clock => Lines::CLOCK,
            Line::Data => Lines::DATA,
            Line::Reset => Lines::RESET,
            Line::Srq => Lines::SRQ,
        }
    }
}

/// A single physical IEC line.
///
/// Implementations own whatever direction switching their hardware needs.
/// `pull()` leaves the line driven low, `release()` leaves it undriven, and
/// `is_pulled()` senses the bus, switching to input first if required.
pub trait BusLine {
    /// Drive the line low (assert it).
    fn pull(&mut self);

    /// Stop driving the line.
    fn release(&mut self);

    /// Read the line.  Returns true if it is low, whoever is driving it.
    fn is_pulled(&mut self) -> bool;
}

/// A line using separate input and output pins, as on the pico1541 boards,
/// where a level shifter sits between the Pico and the 5V bus.  The output
/// is inverted - setting the output pin high pulls the bus line low.
pub struct SplitLine<I, O> {
    input: I,
    output: O,
}

impl<I, O> SplitLine<I, O>
where
    I: InputPin<Error = Infallible>,
    O: OutputPin<Error = Infallible>,
{
    /// Create a new `SplitLine`, initially released.
    pub fn new(input: I, output: O) -> Self {
        let mut line = Self { input, output };
        line.release();
        line
    }
}

impl<I, O> BusLine for SplitLine<I, O>
where
    I: InputPin<Error = Infallible>,
    O: OutputPin<Error = Infallible>,
{
    #[inline(always)]
    fn pull(&mut self) {
        let Ok(()) = self.output.set_high();
    }

    #[inline(always)]
    fn release(&mut self) {
        let Ok(()) = self.output.set_low();
    }

    #[inline(always)]
    fn is_pulled(&mut self) -> bool {
        let Ok(low) = self.input.is_low();
        low
    }
}

/// A line on a single GPIO, wired directly to the bus.  Pulling switches the
/// pin to an output driving low, releasing switches it back to an input so
/// the bus pull-ups take over.  We never drive the line high.
#[cfg(feature = "rp")]
pub struct FlexLine {
    pin: embassy_rp::gpio::Flex<'static>,
    is_output: bool,
}

#[cfg(feature = "rp")]
impl FlexLine {
    /// Create a new `FlexLine`, initially released.
    pub fn new(mut pin: embassy_rp::gpio::Flex<'static>) -> Self {
        pin.set_pull(embassy_rp::gpio::Pull::Up);
        pin.set_low();
        pin.set_as_input();
        Self {
            pin,
            is_output: false,
        }
    }
}

#[cfg(feature = "rp")]
impl BusLine for FlexLine {
    #[inline(always)]
    fn pull(&mut self) {
        // Level first, so we never glitch high when switching direction
        self.pin.set_low();
        self.pin.set_as_output();
        self.is_output = true;
    }

    #[inline(always)]
    fn release(&mut self) {
        self.pin.set_as_input();
        self.is_output = false;
    }

    #[inline(always)]
    fn is_pulled(&mut self) -> bool {
        // While we're driving the line it is low, and switching to input to
        // check would release it.
        if self.is_output {
            true
        } else {
            self.pin.is_low()
        }
    }
}

/// The device's connection to the IEC bus - a line per IEC signal, plus the
/// time source used to bound every wait.
pub struct IecPort<L, T> {
    atn: L,
    clock: L,
    data: L,
    reset: L,
    srq: Option<L>,
    time: T,
}

impl<L: BusLine, T: TimeSource> IecPort<L, T> {
    /// Create a new `IecPort`.  All lines start released.  SRQ is optional -
    /// the serial bus only uses it for fast serial, and some boards don't
    /// wire it up.
    pub fn new(atn: L, clock: L, data: L, reset: L, srq: Option<L>, time: T) -> Self {
        let mut port = Self {
            atn,
            clock,
            data,
            reset,
            srq,
            time,
        };
        port.release_all();
        port
    }

    #[inline(always)]
    fn line_mut(&mut self, line: Line) -> Option<&mut L> {
        match line {
            Line::Atn => Some(&mut self.atn),
            Line::Clock => Some(&mut self.clock),
            Line::Data => Some(&mut self.data),
            Line::Reset => Some(&mut self.reset),
            Line::Srq => self.srq.as_mut(),
        }
    }

    /// Assert `line`.
    #[inline(always)]
    pub fn pull(&mut self, line: Line) {
        if let Some(l) = self.line_mut(line) {
            l.pull();
        }
    }

    /// Let go of `line`.
    #[inline(always)]
    pub fn release(&mut self, line: Line) {
        if let Some(l) = self.line_mut(line) {
            l.release();
        }
    }

    /// Read `line`.  A missing SRQ line always reads released.
    #[inline(always)]
    pub fn read(&mut self, line: Line) -> LineState {
        self.line_mut(line)
            .is_some_and(|l| l.is_pulled())
            .into()
    }

    #[inline(always)]
    pub fn is_pulled(&mut self, line: Line) -> bool {
        self.read(line).is_pulled()
    }

    /// Release multiple lines at once based on a bit mask
    pub fn release_lines(&mut self, mask: Lines) {
        for (line, bit) in [
            (Line::Data, Lines::DATA),
            (Line::Clock, Lines::CLOCK),
            (Line::Atn, Lines::ATN),
            (Line::Reset, Lines::RESET),
            (Line::Srq, Lines::SRQ),
        ] {
            if mask.contains(bit) {
                self.release(line);
            }
        }
    }

    /// Release every line.
    pub fn release_all(&mut self) {
        self.release_lines(Lines::all());
    }

    /// Poll all lines - returns the set of _released_ lines.  This mimics
    /// the `iec_poll_pins` function in the xum1541 code.
    pub fn poll_lines(&mut self) -> Lines {
        let mut result = Lines::empty();
        for line in [Line::Data, Line::Clock, Line::Atn, Line::Reset, Line::Srq] {
            if !self.is_pulled(line) {
                result |= Lines::from(line);
            }
        }
        result
    }

    #[inline(always)]
    pub fn now(&self) -> Instant {
        self.time.now()
    }

    #[inline(always)]
    pub fn block_for(&mut self, duration: Duration) {
        self.time.block_for(duration);
    }

    #[inline(always)]
    pub fn keep_alive(&mut self) {
        self.time.keep_alive();
    }

    #[inline(always)]
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.time.deadline(timeout)
    }

    #[inline(always)]
    pub fn expired(&self, deadline: Instant) -> bool {
        self.time.expired(deadline)
    }
}
