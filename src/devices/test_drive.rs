//! A minimal test drive.
//!
//! This has no storage.  It accepts OPEN, CLOSE and data sent to it, and
//! reports its status on channel 15.  `LOAD"$",8` lists an empty disk, and
//! any attempt to load a file gets FILE NOT FOUND.  It is enough to check,
//! from a C64, that the bus works:
//!
//! ```text
//! OPEN 15,8,15:INPUT#15,A,B$,C,D:PRINT A;B$;C;D
//!  73 PICO IEC TEST DRIVE 0 0
//! ```
//!
//! Two more names can be loaded as listings: `@INFO` describes the drive,
//! and `@STATUS` shows its status without clearing it.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt::Write;
use heapless::{String, Vec};

use crate::constants::{ATN_CMD_MAX_LENGTH, STATUS_CHANNEL, TEST_DRIVE_DEVICE_ID};
use crate::device::{
    DeviceStatus, IecDevice, Listing, OpenChannel, OpenState, STATUS_DOS_VERSION,
    STATUS_SYNTAX_ERROR, TalkByte,
};
use crate::error::IecError;
use crate::protocol::{AtnMode, AtnRecord, BusIo, CommandKind};

// Boot status
const STATUS_STR_BOOT: &str = "PICO IEC TEST DRIVE";
const STATUS_STR_SYNTAX: &str = "SYNTAX ERROR";

// Listing headers
const DISK_NAME: &[u8] = b"PICO IEC TEST";
const DISK_ID: &[u8] = b"PI 2A";
const INFO_NAME: &[u8] = b"SYSTEM INFO";
const STATUS_NAME: &[u8] = b"DEVICE STATUS";

/// A drive with nothing in it.
pub struct TestDrive {
    device_id: u8,
    status: DeviceStatus,
    open_channel: OpenChannel,
    open_channels: u16,
    last_name: Vec<u8, ATN_CMD_MAX_LENGTH>,
    bytes_received: usize,
}

impl Default for TestDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDrive {
    #[must_use]
    pub fn new() -> Self {
        Self {
            device_id: TEST_DRIVE_DEVICE_ID,
            status: Self::boot_status(),
            open_channel: OpenChannel::default(),
            open_channels: 0,
            last_name: Vec::new(),
            bytes_received: 0,
        }
    }

    fn boot_status() -> DeviceStatus {
        DeviceStatus::new(STATUS_DOS_VERSION, STATUS_STR_BOOT, 0, 0)
    }

    /// Whether `channel` is open.
    pub fn is_open(&self, channel: u8) -> bool {
        channel < 16 && self.open_channels & (1 << channel) != 0
    }

    /// The name given to the most recent OPEN.
    pub fn last_name(&self) -> &[u8] {
        &self.last_name
    }

    /// The number of data bytes sent to the drive since the last reset.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// What the drive will send the next time it is asked to talk.
    pub fn open_state(&self) -> OpenState {
        self.open_channel.state()
    }

    // Send whatever the last OPEN asked for.  This only handles listings -
    // anything else falls through to talk_data().
    fn send_open_state(&mut self, io: &mut dyn BusIo) -> Result<(), IecError> {
        let result = match self.open_channel.state() {
            OpenState::Directory => self.send_directory(io),
            OpenState::SystemInfo => self.send_system_info(io),
            OpenState::DeviceStatus => self.send_device_status(io),
            _ => return Ok(()),
        };
        // Each listing can be read once
        self.open_channel.open(OpenState::Nothing);
        result
    }

    // There are no files, so this is just the header.
    fn send_directory(&mut self, io: &mut dyn BusIo) -> Result<(), IecError> {
        debug!("Device {}: sending directory", self.device_id);
        let mut listing = Listing::start(io)?;
        listing.header(io, DISK_NAME, DISK_ID)?;
        listing.finish(io, 0)?;
        Ok(())
    }

    fn send_system_info(&mut self, io: &mut dyn BusIo) -> Result<(), IecError> {
        let mut device: String<16> = String::new();
        let _ = write!(device, "DEVICE {}", self.device_id);

        let mut listing = Listing::start(io)?;
        listing.header(io, INFO_NAME, DISK_ID)?;
        listing.line(io, 0, STATUS_STR_BOOT.as_bytes())?;
        listing.line(io, 0, concat!("VERSION ", env!("CARGO_PKG_VERSION")).as_bytes())?;
        listing.line(io, 0, device.as_bytes())?;
        listing.finish(io, 0)?;
        Ok(())
    }

    fn send_device_status(&mut self, io: &mut dyn BusIo) -> Result<(), IecError> {
        let encoded = self.status.encode();
        let text = encoded.strip_suffix(b"\r").unwrap_or(&encoded[..]);

        let mut listing = Listing::start(io)?;
        listing.header(io, STATUS_NAME, DISK_ID)?;
        listing.line(io, 0, text)?;
        listing.finish(io, 0)?;
        Ok(())
    }

    // Handle a DOS command sent to the command channel.  We only know the
    // initialize and soft reset commands.
    fn dos_command(&mut self, command: &[u8]) {
        match command {
            [] => {}
            [b'I', ..] => self.status = DeviceStatus::ok(),
            [b'U', b'I' | b'J' | b':' | b';', ..] => {
                info!("Device {}: soft reset", self.device_id);
                self.reset();
            }
            _ => {
                debug!("Device {}: unknown command", self.device_id);
                self.status = DeviceStatus::new(STATUS_SYNTAX_ERROR, STATUS_STR_SYNTAX, 0, 0);
            }
        }
    }
}

impl IecDevice for TestDrive {
    fn device_id(&self) -> u8 {
        self.device_id
    }

    fn set_device_id(&mut self, id: u8) {
        self.device_id = id;
    }

    fn reset(&mut self) {
        debug!("Device {}: reset", self.device_id);
        self.status = Self::boot_status();
        self.open_channel.clear();
        self.open_channels = 0;
        self.last_name.clear();
        self.bytes_received = 0;
    }

    fn process_command(
        &mut self,
        record: &AtnRecord,
        io: &mut dyn BusIo,
    ) -> Result<(), IecError> {
        match record.secondary {
            CommandKind::Open => self.open(record.channel, &record.data),
            CommandKind::Close => self.close(record.channel),
            CommandKind::Data | CommandKind::None
                if record.mode == AtnMode::Talk && record.channel != STATUS_CHANNEL =>
            {
                return self.send_open_state(io);
            }
            _ => {}
        }
        Ok(())
    }

    fn report_status(&mut self) -> DeviceStatus {
        core::mem::replace(&mut self.status, DeviceStatus::ok())
    }

    fn open(&mut self, channel: u8, name: &[u8]) {
        info!("Device {}: OPEN channel {}", self.device_id, channel);
        self.open_channels |= 1 << (channel & 0x0F);
        if channel == STATUS_CHANNEL {
            self.dos_command(name);
        } else {
            // Names are never longer than the OPEN payload buffer
            self.last_name.clear();
            let _ = self.last_name.extend_from_slice(name);
            if name != b"@STATUS" {
                self.status = DeviceStatus::ok();
            }

            match name {
                b"$" => self.open_channel.open(OpenState::Directory),
                b"@INFO" => self.open_channel.open(OpenState::SystemInfo),
                b"@STATUS" => self.open_channel.open(OpenState::DeviceStatus),
                // No storage, so no files.  Writes are accepted and dropped.
                _ => self.open_channel.fail(DeviceStatus::file_not_found()),
            }
        }
    }

    fn close(&mut self, channel: u8) {
        info!("Device {}: CLOSE channel {}", self.device_id, channel);
        if channel != STATUS_CHANNEL {
            self.open_channel.clear();
        }
        self.open_channels &= !(1 << (channel & 0x0F));
    }

    fn listen_data(&mut self, channel: u8, byte: u8) {
        trace!("Device {}: channel {} byte 0x{:02x}", self.device_id, channel, byte);
        self.bytes_received += 1;
    }

    fn talk_data(&mut self, channel: u8) -> TalkByte {
        debug!("Device {}: nothing to send on channel {}", self.device_id, channel);
        self.status = self
            .open_channel
            .take_error()
            .unwrap_or_else(DeviceStatus::file_not_found);
        TalkByte::Empty
    }
}
