//! Error types.
//!
//! None of these are fatal.  [`IecError`]s are recovered inside the bus
//! coordinator, which always returns to idle ready for the next ATN.
//! [`ConfigError`]s are caller mistakes when setting up the device chain.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Errors raised while running the IEC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IecError {
    /// A handshake step did not complete within its deadline
    Timeout,
    /// The RESET line was asserted
    Reset,
    /// ATN was asserted during a data phase - a new command is coming
    Atn,
    /// A command byte which doesn't map to any IEC command
    MalformedCommand(u8),
    /// The payload following OPEN overflowed the command buffer
    CommandTooLong,
    /// The turnaround was undone without being done, or undone twice
    Turnaround,
}

/// Errors raised when configuring the device chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Device ids must be 4-30
    InvalidDeviceId(u8),
    /// Another device already has this id
    DuplicateDeviceId(u8),
    /// No device is registered with this id
    NoSuchDevice(u8),
}
