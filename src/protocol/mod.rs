//! The IEC protocol engine.
//!
//! Layered bottom up:
//! - [`line`] - driving and sensing the open collector bus lines
//! - [`handshake`] - sending and receiving bytes, EOI and the turnaround
//! - [`atn`] - decoding the commands the host sends under ATN

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod atn;
pub mod handshake;
pub mod line;

pub use atn::{AtnMode, AtnRecord, CommandKind, IecCommand};
pub use handshake::{BusIo, Handshake, IecState};
#[cfg(feature = "rp")]
pub use line::FlexLine;
pub use line::{BusLine, IecPort, Line, LineState, Lines, SplitLine};
