//! pico-iec
//!
//! This emulates Commodore IEC serial bus devices - disk drives, printers,
//! modems - on a Raspberry Pi Pico, so they appear to a C64 or other CBM
//! host as ordinary bus peripherals.
//!
//! The protocol engine is `no_std` and hardware independent.  It is built
//! from:
//! - [`protocol`] - the line driver, byte handshake and ATN decoder
//! - [`registry`] - the devices on the bus, by id
//! - [`bus`] - the coordinator, which runs the protocol for every device
//! - [`device`] - the contract devices implement
//!
//! The firmware (the `pico` and `pico2` features) wires this up to the
//! pico1541 board's GPIOs.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "rp", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Must come first, so the logging macros are visible to the other modules.
#[macro_use]
mod fmt;

// Declare all of this library's modules.
pub mod bus;
pub mod constants;
pub mod device;
pub mod devices;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod util;

#[cfg(feature = "rp")]
mod entry;
#[cfg(feature = "rp")]
mod infra;

#[cfg(test)]
mod test;

pub use bus::IecBus;
pub use device::{DeviceStatus, IecDevice, Listing, OpenChannel, OpenState, TalkByte};
pub use error::{ConfigError, IecError};
pub use protocol::{AtnMode, AtnRecord, BusIo, IecPort};
pub use registry::DeviceRegistry;

#[cfg(feature = "rp")]
pub use entry::common_main;

// Extra binary information that picotool can read.
#[cfg(feature = "rp")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"pico-iec by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(
        c"Emulates Commodore IEC serial bus devices, such as disk drives, for a C64 or other CBM host."
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];
