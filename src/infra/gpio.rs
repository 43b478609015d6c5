//! This file handles GPIO pin allocation.
//!
//! The source code serves as the master list of pin assignments for the
//! hardware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::gpio::{AnyPin, Drive, Input, Level, Output, Pin, Pull};

use super::watchdog::WatchdogClock;
use crate::protocol::{IecPort, SplitLine};

/// A bus line on the pico1541 boards - an input pin sensing the bus, and an
/// inverting output pin driving it through a transistor.
pub type PicoLine = SplitLine<Input<'static>, Output<'static>>;

/// The IEC port, as built by [`create_iec_port`].
pub type PicoPort = IecPort<PicoLine, WatchdogClock>;

/// IEC Bus pin configuration
#[derive(Clone)]
pub struct IecPinConfig {
    pub clock_in: u8,
    pub clock_out: u8,
    pub data_in: u8,
    pub data_out: u8,
    pub atn_in: u8,
    pub atn_out: u8,
    pub reset_in: u8,
    pub reset_out: u8,
    pub srq_in: u8,
    pub srq_out: u8,
}

/// Pinout used for the pico1541 v0.1 board
pub const IEC_PINS: IecPinConfig = IecPinConfig {
    clock_in: 19,
    clock_out: 11,
    data_in: 20,
    data_out: 13,
    atn_in: 17,
    atn_out: 12,
    reset_in: 18,
    reset_out: 10,
    srq_in: 16,
    srq_out: 14,
};

/// The pins making up the IEC port, taken from the peripherals.
pub struct IecGpios {
    pub clock_in: AnyPin,
    pub clock_out: AnyPin,
    pub data_in: AnyPin,
    pub data_out: AnyPin,
    pub atn_in: AnyPin,
    pub atn_out: AnyPin,
    pub reset_in: AnyPin,
    pub reset_out: AnyPin,
    pub srq_in: AnyPin,
    pub srq_out: AnyPin,
}

impl IecGpios {
    /// Check the pins match [`IEC_PINS`].  Returns the first mismatching
    /// pin number if not.
    pub fn check(&self) -> Result<(), u8> {
        let expected = IEC_PINS.clone();
        for (pin, num) in [
            (&self.clock_in, expected.clock_in),
            (&self.clock_out, expected.clock_out),
            (&self.data_in, expected.data_in),
            (&self.data_out, expected.data_out),
            (&self.atn_in, expected.atn_in),
            (&self.atn_out, expected.atn_out),
            (&self.reset_in, expected.reset_in),
            (&self.reset_out, expected.reset_out),
            (&self.srq_in, expected.srq_in),
            (&self.srq_out, expected.srq_out),
        ] {
            if pin.pin() != num {
                return Err(pin.pin());
            }
        }
        Ok(())
    }
}

fn create_line(input: AnyPin, output: AnyPin) -> PicoLine {
    // The output is inverted, so low leaves the bus line released
    let mut output = Output::new(output, Level::Low);
    output.set_drive_strength(Drive::_12mA);
    SplitLine::new(Input::new(input, Pull::None), output)
}

/// Create the IEC port from its pins.
pub fn create_iec_port(pins: IecGpios, clock: WatchdogClock) -> PicoPort {
    if let Err(pin) = pins.check() {
        warn!("Unexpected IEC pin {}", pin);
    }

    IecPort::new(
        create_line(pins.atn_in, pins.atn_out),
        create_line(pins.clock_in, pins.clock_out),
        create_line(pins.data_in, pins.data_out),
        create_line(pins.reset_in, pins.reset_out),
        Some(create_line(pins.srq_in, pins.srq_out)),
        clock,
    )
}
