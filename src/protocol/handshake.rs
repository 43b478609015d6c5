//! This file implements the IEC byte handshake, from the device's side of
//! the bus.  It is built purely on the line primitives in [`IecPort`].
//!
//! Unlike the C64 (and the xum1541), a device spends most of its time as a
//! listener - it hears every command sent under ATN, and only becomes a
//! talker after a TALK command, via the turnaround.
//!
//! Every wait here is bounded.  A device sharing a single thread between
//! the whole bus and all of its emulated drives can never afford to hang.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use embassy_time::Duration;

use super::line::{BusLine, IecPort, Line, LineState, Lines};
use crate::constants::{
    ATN_PREDELAY, HOLD_OFF_TIMEOUT, IEC_T_AT, IEC_T_BB, IEC_T_DA, IEC_T_EI, IEC_T_F, IEC_T_S,
    IEC_T_V, IEC_T_YE,
};
use crate::error::IecError;
use crate::util::time::TimeSource;

bitflags! {
    /// State of the current transfer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IecState: u8 {
        /// The last byte sent or received was flagged EOI
        const EOI = 1 << 0;
        /// ATN was asserted, interrupting a data phase
        const ATN = 1 << 1;
        /// Something went wrong - the transaction was abandoned
        const ERROR = 1 << 2;
    }
}

// Which way round the bus is.  The turnaround can happen, and be undone,
// once per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Listener,
    Talker,
    Restored,
}

/// The data primitives a device may use during its data phase.
///
/// This is object safe, so devices can be handed a `&mut dyn BusIo`
/// without knowing which GPIO or clock implementation is behind it.
pub trait BusIo {
    /// Send a byte.  The bus must have been turned around (we are talking).
    fn send(&mut self, byte: u8) -> Result<(), IecError>;

    /// Send the last byte, flagged with EOI, then hand the bus back to the
    /// host.
    fn send_eoi(&mut self, byte: u8) -> Result<(), IecError>;

    /// Tell the host there is nothing to send, by releasing the bus without
    /// sending a byte.  The host sees a timeout, which it reports as FILE
    /// NOT FOUND.
    fn send_file_not_found(&mut self) -> Result<(), IecError>;

    /// Receive a byte.  Check [`BusIo::eoi`] to see if it was the last.
    fn receive(&mut self) -> Result<u8, IecError>;

    /// Whether the last byte sent or received was flagged EOI.
    fn eoi(&self) -> bool;

    /// Send all of `bytes`, without EOI.
    fn send_all(&mut self, bytes: &[u8]) -> Result<(), IecError> {
        for &byte in bytes {
            self.send(byte)?;
        }
        Ok(())
    }

    /// Receive into `buf`, stopping after an EOI byte or when `buf` is full.
    ///
    /// # Returns
    /// The number of bytes received
    fn receive_into(&mut self, buf: &mut [u8]) -> Result<usize, IecError> {
        let mut count = 0;
        while count < buf.len() {
            buf[count] = self.receive()?;
            count += 1;
            if self.eoi() {
                break;
            }
        }
        Ok(count)
    }
}

/// The IEC byte handshake.
pub struct Handshake<L, T> {
    port: IecPort<L, T>,
    state: IecState,
    role: Role,
    watch_atn: bool,
}

impl<L: BusLine, T: TimeSource> Handshake<L, T> {
    pub fn new(port: IecPort<L, T>) -> Self {
        Self {
            port,
            state: IecState::empty(),
            role: Role::Listener,
            watch_atn: false,
        }
    }

    /// Access the underlying lines.
    pub fn port(&mut self) -> &mut IecPort<L, T> {
        &mut self.port
    }

    /// Get the state of the current transfer.
    pub fn state(&self) -> IecState {
        self.state
    }

    /// Whether we are currently the talker.
    pub fn is_talker(&self) -> bool {
        self.role == Role::Talker
    }

    /// Whether our turn as talker is over - either the turnaround has been
    /// undone, or we told the host there was nothing to send.
    pub fn talk_finished(&self) -> bool {
        self.role == Role::Restored
    }

    /// Start a new transaction.  Nothing survives from the previous one.
    pub(crate) fn begin_transaction(&mut self) {
        self.state = IecState::empty();
        self.role = Role::Listener;
        self.watch_atn = false;
    }

    /// Whether waits should be abandoned if ATN is asserted.  Set while in
    /// a data phase, as ATN then means the host has a new command for us.
    pub(crate) fn set_watch_atn(&mut self, watch: bool) {
        self.watch_atn = watch;
    }

    /// Respond to ATN.  Every device on the bus must pull DATA within 1ms
    /// of ATN being asserted, or the host decides there are no devices.
    pub(crate) fn acknowledge_atn(&mut self) {
        self.port.pull(Line::Data);
        self.port.release(Line::Clock);
        self.port.block_for(ATN_PREDELAY);
    }

    /// Let go of CLK and DATA, so we are invisible on the bus.
    pub(crate) fn release_lines(&mut self) {
        self.port.release_lines(Lines::CLOCK | Lines::DATA);
    }

    /// Wait for `line` to reach `state`, for at most `timeout`.
    ///
    /// Gives up early if RESET is asserted, or if ATN is asserted while we
    /// are watching for it.  Sets the ERROR or ATN state flag on failure.
    pub fn timeout_wait(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), IecError> {
        let result = self.wait(line, state, timeout);
        self.note(result)
    }

    // The guts of timeout_wait(), without touching the state flags - we use
    // this directly when a timeout is expected, for EOI detection.
    fn wait(&mut self, line: Line, state: LineState, timeout: Duration) -> Result<(), IecError> {
        let deadline = self.port.deadline(timeout);
        loop {
            if self.port.read(line) == state {
                break Ok(());
            }

            if self.port.is_pulled(Line::Reset) {
                break Err(IecError::Reset);
            }

            if self.watch_atn && self.port.is_pulled(Line::Atn) {
                break Err(IecError::Atn);
            }

            if self.port.expired(deadline) {
                break Err(IecError::Timeout);
            }
        }
    }

    // Record a failure in the state flags.
    fn note<R>(&mut self, result: Result<R, IecError>) -> Result<R, IecError> {
        match result {
            Ok(_) => {}
            Err(IecError::Atn) => self.state.insert(IecState::ATN),
            Err(_) => self.state.insert(IecState::ERROR),
        }
        result
    }

    /// Receive a byte, as a listener.
    ///
    /// On entry we are holding DATA (not ready), and the talker is holding
    /// CLK.  On exit we are holding DATA again, acknowledging the byte.
    pub fn receive_byte(&mut self) -> Result<u8, IecError> {
        let result = self.receive_byte_ll();
        self.note(result)
    }

    fn receive_byte_ll(&mut self) -> Result<u8, IecError> {
        self.port.keep_alive();
        self.state.remove(IecState::EOI);

        // Wait for the talker to release CLK - ready to send
        trace!("Wait for talker ready");
        self.wait(Line::Clock, LineState::Released, HOLD_OFF_TIMEOUT)?;

        // Release DATA - ready for data.  The line only goes high when all
        // listeners have released it.
        self.port.release(Line::Data);
        self.wait(Line::Data, LineState::Released, HOLD_OFF_TIMEOUT)?;

        // The talker now pulls CLK within 200us, or it is signalling EOI
        match self.wait(Line::Clock, LineState::Pulled, IEC_T_YE) {
            Ok(()) => {}
            Err(IecError::Timeout) => {
                trace!("EOI");
                self.state.insert(IecState::EOI);

                // Pull DATA for 60us to show we've spotted EOI
                self.port.pull(Line::Data);
                self.port.block_for(IEC_T_EI);
                self.port.release(Line::Data);

                self.wait(Line::Clock, LineState::Pulled, IEC_T_F)?;
            }
            Err(e) => return Err(e),
        }

        // Read the bits, LSB first.  Each is valid while CLK is released,
        // and a released DATA line is a 1.
        let mut byte: u8 = 0;
        for bit in 0..8 {
            self.wait(Line::Clock, LineState::Released, IEC_T_F)?;
            if !self.port.is_pulled(Line::Data) {
                byte |= 1 << bit;
            }
            self.wait(Line::Clock, LineState::Pulled, IEC_T_F)?;
        }

        // Frame handshake - acknowledge the byte
        self.port.pull(Line::Data);

        Ok(byte)
    }

    /// Send a byte, as a talker, optionally signalling EOI.
    ///
    /// On entry we are holding CLK and the listener is holding DATA.  On
    /// exit we are holding CLK and the listener has acknowledged the byte by
    /// pulling DATA.
    pub fn send_byte(&mut self, byte: u8, eoi: bool) -> Result<(), IecError> {
        let result = self.send_byte_ll(byte, eoi);
        self.note(result)
    }

    fn send_byte_ll(&mut self, byte: u8, eoi: bool) -> Result<(), IecError> {
        self.port.keep_alive();
        self.state.remove(IecState::EOI);

        // Release CLK - ready to send
        self.port.release(Line::Clock);

        // Wait for all listeners to release DATA - ready for data
        trace!("Wait for listener ready");
        self.wait(Line::Data, LineState::Released, HOLD_OFF_TIMEOUT)?;

        if eoi {
            // Signal EOI by not pulling CLK.  The listener notices, and
            // pulls DATA briefly to acknowledge.
            trace!("Signal EOI");
            self.wait(Line::Data, LineState::Pulled, IEC_T_F)?;
            self.wait(Line::Data, LineState::Released, IEC_T_F)?;
            self.state.insert(IecState::EOI);
        }

        // Pull CLK, and clock out the bits, LSB first.  There's no handshake
        // per bit - the listener had better be keeping up.
        self.port.pull(Line::Clock);
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                self.port.pull(Line::Data);
            } else {
                self.port.release(Line::Data);
            }
            self.port.block_for(IEC_T_S);
            self.port.release(Line::Clock);
            self.port.block_for(IEC_T_V);
            self.port.pull(Line::Clock);
        }
        self.port.release(Line::Data);

        // Frame handshake - the listener must pull DATA within 1ms
        self.wait(Line::Data, LineState::Pulled, IEC_T_F)?;

        self.port.block_for(IEC_T_BB);

        Ok(())
    }

    /// Switch from listener to talker, following a TALK command.
    ///
    /// After ATN is released the host pulls DATA and releases CLK.  We
    /// release DATA and pull CLK, so we're holding CLK as a talker should.
    pub fn turn_around(&mut self) -> Result<(), IecError> {
        let result = self.turn_around_ll();
        self.note(result)
    }

    fn turn_around_ll(&mut self) -> Result<(), IecError> {
        if self.role != Role::Listener {
            warn!("Turnaround attempted when not the listener");
            return Err(IecError::Turnaround);
        }

        self.wait(Line::Clock, LineState::Released, IEC_T_AT)?;
        self.port.release(Line::Data);
        self.port.pull(Line::Clock);
        self.port.block_for(IEC_T_DA);

        self.role = Role::Talker;
        Ok(())
    }

    /// Return the bus to the way round it was before [`turn_around()`], so
    /// we are back to being a listener.  This may only be done once per
    /// transaction, and only after a turnaround.
    ///
    /// [`turn_around()`]: Handshake::turn_around
    pub fn undo_turn_around(&mut self) -> Result<(), IecError> {
        if self.role != Role::Talker {
            warn!("Turnaround undone when not the talker");
            return self.note(Err(IecError::Turnaround));
        }

        self.port.pull(Line::Data);
        self.port.release(Line::Clock);
        self.port.block_for(IEC_T_V);

        self.role = Role::Restored;
        Ok(())
    }
}

impl<L: BusLine, T: TimeSource> BusIo for Handshake<L, T> {
    fn send(&mut self, byte: u8) -> Result<(), IecError> {
        self.send_byte(byte, false)
    }

    fn send_eoi(&mut self, byte: u8) -> Result<(), IecError> {
        self.send_byte(byte, true)?;
        self.undo_turn_around()
    }

    fn send_file_not_found(&mut self) -> Result<(), IecError> {
        debug!("File not found");
        self.release_lines();
        self.port.block_for(IEC_T_BB);
        self.role = Role::Restored;
        Ok(())
    }

    fn receive(&mut self) -> Result<u8, IecError> {
        self.receive_byte()
    }

    fn eoi(&self) -> bool {
        self.state.contains(IecState::EOI)
    }
}
