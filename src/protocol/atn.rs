//! This file implements the ATN command decoder.
//!
//! While ATN is asserted every device on the bus listens.  The host sends
//! a primary command (LISTEN, TALK, UNLISTEN, UNTALK) and optionally a
//! secondary command (DATA, OPEN, CLOSE) carrying a channel number.  After
//! a LISTEN + OPEN the host releases ATN and sends the file name, or disk
//! command, as ordinary data bytes terminated by EOI.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use super::handshake::{Handshake, IecState};
use super::line::{BusLine, Line};
use crate::constants::{
    ATN_BYTE_TIMEOUT, ATN_CHANNEL_MASK, ATN_CMD_CLOSE, ATN_CMD_DATA, ATN_CMD_GLOBAL,
    ATN_CMD_LISTEN, ATN_CMD_MAX_LENGTH, ATN_CMD_OPEN, ATN_CMD_TALK, ATN_CMD_UNLISTEN, ATN_CMD_UNTALK,
    ATN_DEVICE_MASK,
};
use crate::error::IecError;
use crate::util::time::TimeSource;

/// Where the bus coordinator is in handling the host's commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AtnMode {
    /// Nothing happening, or nothing for us
    #[default]
    Idle,
    /// ATN asserted, reading command bytes
    Cmd,
    /// One of our devices is listening
    Listen,
    /// One of our devices is talking
    Talk,
    /// The last transaction was abandoned
    Error,
    /// The host is resetting the bus
    Reset,
}

/// A decoded ATN command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IecCommand {
    /// 0x00-0x1F, not addressed to any device
    Global(u8),
    /// LISTEN, with the device id
    Listen(u8),
    Unlisten,
    /// TALK, with the device id
    Talk(u8),
    Untalk,
    /// DATA (secondary address), with the channel
    Data(u8),
    /// CLOSE, with the channel
    Close(u8),
    /// OPEN, with the channel
    Open(u8),
}

impl IecCommand {
    /// Decode a byte received under ATN.
    pub fn from_byte(byte: u8) -> Result<Self, IecError> {
        let device = byte & ATN_DEVICE_MASK;
        let channel = byte & ATN_CHANNEL_MASK;
        match byte {
            ATN_CMD_GLOBAL..ATN_CMD_LISTEN => Ok(IecCommand::Global(byte)),
            ATN_CMD_LISTEN..ATN_CMD_UNLISTEN => Ok(IecCommand::Listen(device)),
            ATN_CMD_UNLISTEN => Ok(IecCommand::Unlisten),
            ATN_CMD_TALK..ATN_CMD_UNTALK => Ok(IecCommand::Talk(device)),
            ATN_CMD_UNTALK => Ok(IecCommand::Untalk),
            ATN_CMD_DATA..=0x6F => Ok(IecCommand::Data(channel)),
            ATN_CMD_CLOSE..ATN_CMD_OPEN => Ok(IecCommand::Close(channel)),
            ATN_CMD_OPEN..=0xFF => Ok(IecCommand::Open(channel)),
            _ => Err(IecError::MalformedCommand(byte)),
        }
    }

    /// Encode as the byte sent under ATN.
    pub fn to_byte(self) -> u8 {
        match self {
            IecCommand::Global(byte) => byte,
            IecCommand::Listen(device) => ATN_CMD_LISTEN | (device & ATN_DEVICE_MASK),
            IecCommand::Unlisten => ATN_CMD_UNLISTEN,
            IecCommand::Talk(device) => ATN_CMD_TALK | (device & ATN_DEVICE_MASK),
            IecCommand::Untalk => ATN_CMD_UNTALK,
            IecCommand::Data(channel) => ATN_CMD_DATA | (channel & ATN_CHANNEL_MASK),
            IecCommand::Close(channel) => ATN_CMD_CLOSE | (channel & ATN_CHANNEL_MASK),
            IecCommand::Open(channel) => ATN_CMD_OPEN | (channel & ATN_CHANNEL_MASK),
        }
    }

    /// Whether this is LISTEN, UNLISTEN, TALK or UNTALK.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            IecCommand::Listen(_) | IecCommand::Unlisten | IecCommand::Talk(_) | IecCommand::Untalk
        )
    }

    pub fn kind(self) -> CommandKind {
        match self {
            IecCommand::Global(_) => CommandKind::Global,
            IecCommand::Listen(_) => CommandKind::Listen,
            IecCommand::Unlisten => CommandKind::Unlisten,
            IecCommand::Talk(_) => CommandKind::Talk,
            IecCommand::Untalk => CommandKind::Untalk,
            IecCommand::Data(_) => CommandKind::Data,
            IecCommand::Close(_) => CommandKind::Close,
            IecCommand::Open(_) => CommandKind::Open,
        }
    }
}

/// The kind of a command, without its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandKind {
    #[default]
    None,
    Global,
    Listen,
    Unlisten,
    Talk,
    Untalk,
    Data,
    Close,
    Open,
}

/// Everything learned from the current ATN sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtnRecord {
    /// The coordinator's mode
    pub mode: AtnMode,
    /// The last raw command byte received
    pub code: u8,
    /// The primary command - LISTEN, TALK, UNLISTEN or UNTALK
    pub primary: CommandKind,
    /// The secondary command - DATA, OPEN or CLOSE
    pub secondary: CommandKind,
    /// The channel from the secondary command
    pub channel: u8,
    /// The device id from LISTEN or TALK
    pub device_id: u8,
    /// The payload following OPEN - usually a file name
    pub data: Vec<u8, ATN_CMD_MAX_LENGTH>,
}

impl AtnRecord {
    /// Clear the record ready for a new ATN sequence.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The command a device should act on - the secondary command if there
    /// was one, otherwise the primary.
    pub fn command(&self) -> CommandKind {
        if self.secondary == CommandKind::None {
            self.primary
        } else {
            self.secondary
        }
    }

    /// Whether a secondary command has been received since the last
    /// primary.
    pub fn has_secondary(&self) -> bool {
        self.secondary != CommandKind::None
    }

    /// Apply a byte received under ATN.  A later primary command replaces an
    /// earlier one in the same sequence, along with its secondary command.
    pub fn apply(&mut self, byte: u8) -> Result<IecCommand, IecError> {
        self.code = byte;
        let command = IecCommand::from_byte(byte).inspect_err(|_| {
            self.mode = AtnMode::Error;
        })?;

        if command.is_primary() {
            self.secondary = CommandKind::None;
            self.channel = 0;
        }

        match command {
            IecCommand::Global(_) => {}
            IecCommand::Listen(id) => {
                self.mode = AtnMode::Listen;
                self.primary = CommandKind::Listen;
                self.device_id = id;
            }
            IecCommand::Talk(id) => {
                self.mode = AtnMode::Talk;
                self.primary = CommandKind::Talk;
                self.device_id = id;
            }
            IecCommand::Unlisten | IecCommand::Untalk => {
                self.mode = AtnMode::Idle;
                self.primary = command.kind();
            }
            IecCommand::Data(channel) | IecCommand::Close(channel) | IecCommand::Open(channel) => {
                self.secondary = command.kind();
                self.channel = channel;
            }
        }

        Ok(command)
    }
}

// What the host did next, while holding ATN.
enum AtnEvent {
    Byte,
    Released,
}

// Wait for the host to either start sending another command byte, by
// releasing CLK, or to finish the command sequence, by releasing ATN.
fn wait_atn_event<L: BusLine, T: TimeSource>(
    link: &mut Handshake<L, T>,
) -> Result<AtnEvent, IecError> {
    let port = link.port();
    let deadline = port.deadline(ATN_BYTE_TIMEOUT);
    loop {
        if port.is_pulled(Line::Reset) {
            break Err(IecError::Reset);
        }
        if !port.is_pulled(Line::Atn) {
            break Ok(AtnEvent::Released);
        }
        if !port.is_pulled(Line::Clock) {
            break Ok(AtnEvent::Byte);
        }
        if port.expired(deadline) {
            break Err(IecError::Timeout);
        }
    }
}

/// Read command bytes for as long as the host holds ATN, applying each to
/// `record`.  ATN must have been acknowledged already.
///
/// The host may send several commands in one sequence - the kernal's CLOSE
/// is LISTEN, CLOSE, UNLISTEN.  When a primary command arrives while the
/// record holds a secondary command, `superseded` is called with the record
/// as it stood, before the secondary is dropped.  ATN is still asserted at
/// that point, so there is no data phase.
///
/// Returns once ATN is released.  We are left holding DATA.
pub fn receive_command<L, T, F>(
    link: &mut Handshake<L, T>,
    record: &mut AtnRecord,
    mut superseded: F,
) -> Result<(), IecError>
where
    L: BusLine,
    T: TimeSource,
    F: FnMut(&AtnRecord, &mut Handshake<L, T>) -> Result<(), IecError>,
{
    record.mode = AtnMode::Cmd;
    loop {
        match wait_atn_event(link)? {
            AtnEvent::Released => break,
            AtnEvent::Byte => {
                let byte = link.receive_byte()?;
                trace!("ATN byte: 0x{:02x}", byte);
                if record.has_secondary()
                    && IecCommand::from_byte(byte).is_ok_and(IecCommand::is_primary)
                {
                    superseded(record, link)?;
                }
                record.apply(byte)?;
            }
        }
    }

    debug!(
        "ATN done: code 0x{:02x} device {} channel {}",
        record.code, record.device_id, record.channel
    );
    Ok(())
}

/// Read the payload following LISTEN + OPEN into `record`, up to and
/// including the EOI byte.
///
/// Exactly [`ATN_CMD_MAX_LENGTH`] bytes fit.  Any more fails with
/// [`IecError::CommandTooLong`].
pub fn receive_payload<L: BusLine, T: TimeSource>(
    link: &mut Handshake<L, T>,
    record: &mut AtnRecord,
) -> Result<(), IecError> {
    record.data.clear();
    loop {
        let byte = link.receive_byte()?;
        if record.data.push(byte).is_err() {
            warn!("OPEN payload too long");
            record.mode = AtnMode::Error;
            return Err(IecError::CommandTooLong);
        }
        if link.state().contains(IecState::EOI) {
            break;
        }
    }

    trace!("OPEN payload: {} bytes", record.data.len());
    Ok(())
}
