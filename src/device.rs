//! This file contains the contract between the bus coordinator and the
//! devices it emulates - disk drives, printers, modems and so on.
//!
//! Devices are trait objects, so one chain can mix device types.  A device
//! only ever hears commands addressed to its own id.  The coordinator does
//! all the protocol work, and a simple device need only implement the
//! hooks - `open()`, `close()`, `listen_data()` and `talk_data()`.  A device
//! wanting more control overrides `process_command()`, which is handed the
//! raw bus primitives.
//!
//! This also provides what most devices need to answer a read: the CBM DOS
//! status string ([`DeviceStatus`]), a record of what was opened
//! ([`OpenChannel`]), and [`Listing`], which sends a directory listing in
//! the BASIC program form `LOAD"$",8` expects.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use crate::constants::{
    DISK_NAME_LENGTH, LISTING_LOAD_ADDRESS, LISTING_TEXT_MAX_LENGTH, STATUS_MAX_LENGTH,
};
use crate::error::IecError;
use crate::protocol::{AtnRecord, BusIo, CommandKind};

/// The next byte a talking device has to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TalkByte {
    /// A byte, with more to follow
    Data(u8),
    /// The last byte - it is sent with EOI
    Last(u8),
    /// Nothing to send.  If no bytes have been sent, the host sees FILE NOT
    /// FOUND.
    Empty,
}

// CBM DOS status codes
pub const STATUS_OK: u8 = 0;
pub const STATUS_SYNTAX_ERROR: u8 = 30;
pub const STATUS_FILE_NOT_FOUND: u8 = 62;
pub const STATUS_DOS_VERSION: u8 = 73;

/// A device's status, as read from channel 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
    pub code: u8,
    pub message: &'static str,
    pub track: u8,
    pub sector: u8,
}

impl DeviceStatus {
    // Fixed parts of the encoding - "NN," and ",TT,SS\r"
    const OVERHEAD: usize = 3 + 7;

    pub const fn new(code: u8, message: &'static str, track: u8, sector: u8) -> Self {
        Self {
            code,
            message,
            track,
            sector,
        }
    }

    pub const fn ok() -> Self {
        Self::new(STATUS_OK, "OK", 0, 0)
    }

    pub const fn file_not_found() -> Self {
        Self::new(STATUS_FILE_NOT_FOUND, "FILE NOT FOUND", 0, 0)
    }

    /// Encode as a CBM DOS status string, e.g. "00,OK,00,00\r".  Over-long
    /// messages are truncated.
    pub fn encode(&self) -> Vec<u8, STATUS_MAX_LENGTH> {
        let mut out = Vec::new();
        let message_len = self.message.len().min(STATUS_MAX_LENGTH - Self::OVERHEAD);

        Self::push_decimal(&mut out, self.code);
        Self::push(&mut out, b",");
        Self::push(&mut out, &self.message.as_bytes()[..message_len]);
        Self::push(&mut out, b",");
        Self::push_decimal(&mut out, self.track);
        Self::push(&mut out, b",");
        Self::push_decimal(&mut out, self.sector);
        Self::push(&mut out, b"\r");

        out
    }

    fn push(out: &mut Vec<u8, STATUS_MAX_LENGTH>, bytes: &[u8]) {
        // Can't overflow, as the message has been truncated to fit
        let _ = out.extend_from_slice(bytes);
    }

    // Two decimal digits, values over 99 are clamped
    fn push_decimal(out: &mut Vec<u8, STATUS_MAX_LENGTH>, value: u8) {
        let value = value.min(99);
        Self::push(out, &[b'0' + value / 10, b'0' + value % 10]);
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::ok()
    }
}

/// Send `status` in reply to a read of the command channel, with EOI on the
/// last byte.
pub fn send_status(io: &mut dyn BusIo, status: &DeviceStatus) -> Result<(), IecError> {
    let encoded = status.encode();
    match encoded.split_last() {
        Some((&last, rest)) => {
            io.send_all(rest)?;
            io.send_eoi(last)
        }
        None => io.send_file_not_found(),
    }
}

/// What a device sends the next time it is asked to talk, following an
/// OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenState {
    /// Nothing - the host sees FILE NOT FOUND
    #[default]
    Nothing,
    /// The contents of an open file
    File,
    /// A directory listing
    Directory,
    /// An open file in a format the device can't send
    FileError,
    /// A listing of information about the device's system
    SystemInfo,
    /// A listing of the device's status
    DeviceStatus,
}

/// The result of the last OPEN - what to send, or the error to report when
/// the host tries to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenChannel {
    state: OpenState,
    queued_error: Option<DeviceStatus>,
}

impl OpenChannel {
    pub fn state(&self) -> OpenState {
        self.state
    }

    /// The OPEN succeeded.
    pub fn open(&mut self, state: OpenState) {
        self.state = state;
        self.queued_error = None;
    }

    /// The OPEN failed.  `error` is held until the host tries to read.
    pub fn fail(&mut self, error: DeviceStatus) {
        self.state = OpenState::Nothing;
        self.queued_error = Some(error);
    }

    pub fn queued_error(&self) -> Option<&DeviceStatus> {
        self.queued_error.as_ref()
    }

    /// Take the queued error, leaving none.
    pub fn take_error(&mut self) -> Option<DeviceStatus> {
        self.queued_error.take()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A listing being sent to the host as a BASIC program.
///
/// Each line is a link to the next line, a line number (the block count),
/// the text and a zero.  The program ends with a zero link, which
/// [`Listing::finish()`] sends with EOI.
#[derive(Debug)]
pub struct Listing {
    basic_ptr: u16,
}

impl Listing {
    // RVS ON - the header is shown in reverse video
    const REVERSE_ON: u8 = 0x12;

    /// Start a listing, by sending the load address.
    pub fn start(io: &mut dyn BusIo) -> Result<Self, IecError> {
        io.send_all(&LISTING_LOAD_ADDRESS.to_le_bytes())?;
        Ok(Self {
            basic_ptr: LISTING_LOAD_ADDRESS,
        })
    }

    /// Send the header line - the quoted disk name, padded to 16
    /// characters, then the disk id.  Returns the bytes sent.
    pub fn header(&mut self, io: &mut dyn BusIo, name: &[u8], id: &[u8]) -> Result<u16, IecError> {
        let name = &name[..name.len().min(DISK_NAME_LENGTH)];
        let id = &id[..id.len().min(LISTING_TEXT_MAX_LENGTH - DISK_NAME_LENGTH - 4)];

        let mut text: Vec<u8, LISTING_TEXT_MAX_LENGTH> = Vec::new();
        let _ = text.extend_from_slice(&[Self::REVERSE_ON, b'"']);
        let _ = text.extend_from_slice(name);
        for _ in name.len()..DISK_NAME_LENGTH {
            let _ = text.push(b' ');
        }
        let _ = text.extend_from_slice(b"\" ");
        let _ = text.extend_from_slice(id);

        self.send_line(io, 0, &text)
    }

    /// Send a line.  The text is indented so it lines up whatever the
    /// width of the block count.  Returns the bytes sent.
    pub fn line(&mut self, io: &mut dyn BusIo, blocks: u16, text: &[u8]) -> Result<u16, IecError> {
        let indent = match blocks {
            0..10 => 3,
            10..100 => 2,
            100..1000 => 1,
            _ => 0,
        };
        let text = &text[..text.len().min(LISTING_TEXT_MAX_LENGTH - indent)];

        let mut line: Vec<u8, LISTING_TEXT_MAX_LENGTH> = Vec::new();
        for _ in 0..indent {
            let _ = line.push(b' ');
        }
        let _ = line.extend_from_slice(text);

        self.send_line(io, blocks, &line)
    }

    /// Send the BLOCKS FREE line and end the program.  Returns the bytes
    /// sent.
    pub fn finish(mut self, io: &mut dyn BusIo, blocks_free: u16) -> Result<u16, IecError> {
        let sent = self.send_line(io, blocks_free, b"BLOCKS FREE.")?;
        io.send(0)?;
        io.send_eoi(0)?;
        Ok(sent + 2)
    }

    fn send_line(&mut self, io: &mut dyn BusIo, number: u16, text: &[u8]) -> Result<u16, IecError> {
        let text = &text[..text.len().min(LISTING_TEXT_MAX_LENGTH)];
        // Link, line number, text, terminator
        let len = (text.len() + 5) as u16;
        self.basic_ptr = self.basic_ptr.wrapping_add(len);

        io.send_all(&self.basic_ptr.to_le_bytes())?;
        io.send_all(&number.to_le_bytes())?;
        io.send_all(text)?;
        io.send(0)?;
        Ok(len)
    }
}

/// An emulated IEC device.
pub trait IecDevice {
    /// The device's id (4-30).
    fn device_id(&self) -> u8;

    /// Change the device's id.  Called by the registry on registration, and
    /// when the id is changed.
    fn set_device_id(&mut self, id: u8);

    /// The host has reset the bus.  Close everything and return to the
    /// power-on state.
    fn reset(&mut self);

    /// The device is about to lose power.
    fn shutdown(&mut self) {}

    /// Handle a command addressed to this device.
    ///
    /// Called after the ATN sequence.  For OPEN, `record.data` holds the
    /// payload.  During a TALK the bus has already been turned around.
    /// Any data sent or received here with `io` is in addition to the data
    /// phase the coordinator runs afterwards through `listen_data()` or
    /// `talk_data()` - which are skipped if this returns having consumed
    /// the data phase (received an EOI byte, or finished talking).
    ///
    /// The default calls `open()` or `close()`.
    fn process_command(
        &mut self,
        record: &AtnRecord,
        io: &mut dyn BusIo,
    ) -> Result<(), IecError> {
        let _ = io;
        match record.secondary {
            CommandKind::Open => self.open(record.channel, &record.data),
            CommandKind::Close => self.close(record.channel),
            _ => {}
        }
        Ok(())
    }

    /// Report the device status, for a read of channel 15.  Devices usually
    /// reset their status to OK once it has been read.
    fn report_status(&mut self) -> DeviceStatus {
        DeviceStatus::ok()
    }

    /// A channel has been opened, with the given name.
    fn open(&mut self, _channel: u8, _name: &[u8]) {}

    /// A channel has been closed.
    fn close(&mut self, _channel: u8) {}

    /// A byte has been sent to the device on a channel.
    fn listen_data(&mut self, _channel: u8, _byte: u8) {}

    /// The host wants a byte from the device on a channel.
    fn talk_data(&mut self, _channel: u8) -> TalkByte {
        TalkByte::Empty
    }
}
