//! This file implements the bus coordinator.  It owns the IEC port and the
//! device registry, and runs the protocol on behalf of every registered
//! device.
//!
//! The firmware calls [`IecBus::service()`] in a tight loop.  Each call
//! handles at most one ATN sequence and the data phase that follows it,
//! then returns the resulting mode.  Every wait is bounded, so a call never
//! blocks for long, whatever the host does.
//!
//! Errors never escape `service()`.  A failed transaction releases the bus,
//! forgets the active device and reports [`AtnMode::Error`], and the next
//! ATN starts afresh.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::STATUS_CHANNEL;
use crate::device::{IecDevice, TalkByte, send_status};
use crate::error::{ConfigError, IecError};
use crate::protocol::atn::{receive_command, receive_payload};
use crate::protocol::{
    AtnMode, AtnRecord, BusIo, BusLine, CommandKind, Handshake, IecPort, IecState, Line,
};
use crate::registry::DeviceRegistry;
use crate::util::time::TimeSource;

/// The device side of an IEC bus.
pub struct IecBus<'a, L, T> {
    link: Handshake<L, T>,
    registry: DeviceRegistry<'a>,
    record: AtnRecord,
    active: Option<u8>,
    active_mode: AtnMode,
    in_reset: bool,
    skip_atn: bool,
}

impl<'a, L: BusLine, T: TimeSource> IecBus<'a, L, T> {
    /// Create a new bus coordinator, with no devices.
    pub fn new(port: IecPort<L, T>) -> Self {
        Self {
            link: Handshake::new(port),
            registry: DeviceRegistry::new(),
            record: AtnRecord::default(),
            active: None,
            active_mode: AtnMode::Idle,
            in_reset: false,
            skip_atn: false,
        }
    }

    //
    // Device chain management
    //

    pub fn add_device(
        &mut self,
        device: &'a mut dyn IecDevice,
        id: u8,
    ) -> Result<(), ConfigError> {
        self.registry.add_device(device, id)
    }

    pub fn remove_device(&mut self, id: u8) -> Result<&'a mut dyn IecDevice, ConfigError> {
        self.forget(id);
        self.registry.remove_device(id)
    }

    pub fn device_by_id(&mut self, id: u8) -> Option<&mut (dyn IecDevice + 'a)> {
        self.registry.device_by_id(id)
    }

    pub fn change_device_id(&mut self, old: u8, new: u8) -> Result<(), ConfigError> {
        self.registry.change_device_id(old, new)?;
        if self.active == Some(old) {
            self.active = Some(new);
            if !self.registry.is_enabled(new) {
                self.forget(new);
            }
        }
        Ok(())
    }

    pub fn num_devices(&self) -> usize {
        self.registry.num_devices()
    }

    pub fn is_device_enabled(&self, id: u8) -> bool {
        self.registry.is_enabled(id)
    }

    pub fn enable_device(&mut self, id: u8) -> Result<(), ConfigError> {
        self.registry.enable_device(id)
    }

    /// Disable a device id.  If it is the active device, it stops being so.
    pub fn disable_device(&mut self, id: u8) -> Result<(), ConfigError> {
        self.registry.disable_device(id)?;
        self.forget(id);
        Ok(())
    }

    /// Read-only access to the registry.
    pub fn registry(&self) -> &DeviceRegistry<'a> {
        &self.registry
    }

    // Stop treating `id` as the active device.
    fn forget(&mut self, id: u8) {
        if self.active == Some(id) {
            self.active = None;
            self.active_mode = AtnMode::Idle;
        }
    }

    //
    // State
    //

    /// The record of the last ATN sequence.
    pub fn record(&self) -> &AtnRecord {
        &self.record
    }

    /// The device currently listening or talking, if any.
    pub fn active_device(&self) -> Option<u8> {
        self.active
    }

    /// The state of the current, or last, transfer.
    pub fn state(&self) -> IecState {
        self.link.state()
    }

    /// Access the underlying IEC port.
    pub fn port(&mut self) -> &mut IecPort<L, T> {
        self.link.port()
    }

    //
    // Lifecycle
    //

    /// Reset every device, as if the host had pulsed RESET.
    pub fn reset(&mut self) {
        info!("Resetting devices");
        self.reset_devices();
    }

    /// Tell every device we are about to lose power, and let go of the bus.
    pub fn shutdown(&mut self) {
        info!("Shutting down devices");
        for device in self.registry.iter_mut() {
            device.shutdown();
        }
        self.end_transaction();
        self.link.port().release_all();
    }

    fn reset_devices(&mut self) {
        for device in self.registry.iter_mut() {
            device.reset();
        }
        self.record.clear();
        self.record.mode = AtnMode::Reset;
        self.end_transaction();
    }

    // Forget the active device and let go of CLK and DATA.
    fn end_transaction(&mut self) {
        self.active = None;
        self.active_mode = AtnMode::Idle;
        self.link.release_lines();
    }

    //
    // Main loop
    //

    /// Service the bus.  Call this repeatedly.
    ///
    /// Returns the mode the bus is left in - [`AtnMode::Idle`] if there was
    /// nothing for us to do.
    pub fn service(&mut self) -> AtnMode {
        let port = self.link.port();

        if port.is_pulled(Line::Reset) {
            if port.is_pulled(Line::Atn) {
                // RESET and ATN together means the host is switched off.
                // Stay out of the way.
                return AtnMode::Idle;
            }

            if !self.in_reset {
                info!("Bus reset");
                self.in_reset = true;
                self.reset_devices();
            }
            return AtnMode::Reset;
        }
        self.in_reset = false;

        if !port.is_pulled(Line::Atn) {
            self.skip_atn = false;
            return AtnMode::Idle;
        }

        // A transaction failed part way through this ATN sequence.  Wait
        // for the host to finish it.
        if self.skip_atn {
            return AtnMode::Idle;
        }

        let mode = match self.attention() {
            Ok(mode) => mode,
            Err(e) => self.recover(e),
        };
        self.record.mode = mode;
        mode
    }

    // Tidy up after a failed transaction.
    fn recover(&mut self, e: IecError) -> AtnMode {
        match e {
            IecError::Reset => {
                // Handled here, rather than on the next service(), so the
                // devices hear about it even if RESET is very short.
                info!("Bus reset during transaction");
                self.in_reset = true;
                self.reset_devices();
                AtnMode::Reset
            }
            IecError::Atn => {
                // The host has a new command for us.  This isn't an error -
                // the next service() reads the command.
                debug!("Data phase ended by ATN");
                AtnMode::Cmd
            }
            _ => {
                warn!(
                    "Transaction failed: {} code 0x{:02x}",
                    e, self.record.code
                );
                self.end_transaction();
                self.skip_atn = self.link.port().is_pulled(Line::Atn);
                AtnMode::Error
            }
        }
    }

    // Handle ATN being asserted - read the command and run the data phase.
    fn attention(&mut self) -> Result<AtnMode, IecError> {
        self.record.clear();
        self.link.begin_transaction();
        self.link.acknowledge_atn();

        let registry = &mut self.registry;
        let active = self.active;
        receive_command(&mut self.link, &mut self.record, |record, link| {
            Self::dispatch_superseded(registry, active, record, link)
        })?;

        // ATN has been released.  From now on, ATN means the host wants to
        // start a new command.
        self.link.set_watch_atn(true);

        match self.record.primary {
            CommandKind::Unlisten | CommandKind::Untalk => {
                trace!("Unlisten/untalk");
                self.end_transaction();
                return Ok(AtnMode::Idle);
            }
            CommandKind::Listen | CommandKind::Talk => {
                let id = self.record.device_id;
                if self.registry.enabled_device(id).is_none() {
                    // Not for us
                    trace!("Ignoring command for device {}", id);
                    self.end_transaction();
                    return Ok(AtnMode::Idle);
                }
                self.active = Some(id);
                self.active_mode = self.record.mode;
            }
            _ => {
                // A secondary command on its own applies to whichever
                // device is already listening or talking.
                match self.active {
                    Some(id) if self.record.secondary != CommandKind::None => {
                        self.record.device_id = id;
                        self.record.mode = self.active_mode;
                    }
                    _ => {
                        self.link.release_lines();
                        return Ok(AtnMode::Idle);
                    }
                }
            }
        }

        match self.record.mode {
            AtnMode::Listen => self.listen(),
            AtnMode::Talk => self.talk(),
            _ => Ok(AtnMode::Idle),
        }
    }

    // Hand a secondary command to its device, before a later primary
    // command in the same ATN sequence replaces it.  Only OPEN and CLOSE are
    // delivered, as neither needs a data phase.  An OPEN cut short like this
    // has no name.
    fn dispatch_superseded(
        registry: &mut DeviceRegistry<'a>,
        active: Option<u8>,
        record: &AtnRecord,
        link: &mut Handshake<L, T>,
    ) -> Result<(), IecError> {
        if !matches!(record.secondary, CommandKind::Open | CommandKind::Close) {
            return Ok(());
        }

        let id = match record.primary {
            CommandKind::Listen | CommandKind::Talk => record.device_id,
            CommandKind::None => match active {
                Some(id) => id,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let Some(device) = registry.enabled_device(id) else {
            return Ok(());
        };

        debug!("Device {}: secondary 0x{:02x} before next command", id, record.code);
        let mut record = record.clone();
        record.device_id = id;
        record.data.clear();
        device.process_command(&record, link)
    }

    // Run the listen side of a transaction.
    fn listen(&mut self) -> Result<AtnMode, IecError> {
        let Some(device) = self.registry.enabled_device(self.record.device_id) else {
            return Ok(AtnMode::Idle);
        };

        match self.record.secondary {
            CommandKind::Open => {
                receive_payload(&mut self.link, &mut self.record)?;
                device.process_command(&self.record, &mut self.link)?;
            }
            CommandKind::Close => {
                device.process_command(&self.record, &mut self.link)?;
            }
            _ => {
                device.process_command(&self.record, &mut self.link)?;

                let channel = self.record.channel;
                while !self.link.eoi() {
                    let byte = self.link.receive_byte()?;
                    device.listen_data(channel, byte);
                }
            }
        }

        Ok(AtnMode::Listen)
    }

    // Run the talk side of a transaction.
    fn talk(&mut self) -> Result<AtnMode, IecError> {
        let Some(device) = self.registry.enabled_device(self.record.device_id) else {
            return Ok(AtnMode::Idle);
        };

        self.link.turn_around()?;
        device.process_command(&self.record, &mut self.link)?;

        let has_data = matches!(
            self.record.secondary,
            CommandKind::Data | CommandKind::None
        );
        if has_data && !self.link.talk_finished() {
            let channel = self.record.channel;
            if channel == STATUS_CHANNEL {
                let status = device.report_status();
                send_status(&mut self.link, &status)?;
            } else {
                loop {
                    match device.talk_data(channel) {
                        TalkByte::Data(byte) => self.link.send(byte)?,
                        TalkByte::Last(byte) => break self.link.send_eoi(byte)?,
                        TalkByte::Empty => break self.link.send_file_not_found()?,
                    }
                }
            }
        }

        // Hand the bus back, if nobody did already
        if self.link.is_talker() {
            self.link.undo_turn_around()?;
        }

        Ok(AtnMode::Talk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAX_DEVICE_ID, MIN_DEVICE_ID};
    use crate::devices::TestDrive;
    use crate::protocol::IecCommand;
    use crate::test::{Recorder, Sim};

    fn open(bus_id: u8, channel: u8) -> [u8; 2] {
        [0x20 | bus_id, 0xF0 | channel]
    }

    #[test]
    fn open_save_reaches_only_device_8() {
        let sim = Sim::new();
        let mut drive8 = Recorder::new();
        let mut drive9 = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive8, 8).unwrap();
            bus.add_device(&mut drive9, 9).unwrap();

            {
                let mut host = sim.host();
                host.atn(&open(8, 2));
                host.send_data(b"SAVE", true);
            }
            let modes = sim.run(&mut bus);
            assert_eq!(modes, [AtnMode::Listen]);
            assert_eq!(bus.active_device(), Some(8));
            assert_eq!(bus.record().data.as_slice(), b"SAVE");

            sim.host().unlisten();
            sim.run(&mut bus);
            assert_eq!(bus.active_device(), None);
        }

        assert_eq!(drive8.opened, [(2, b"SAVE".to_vec())]);
        assert!(drive8.commands.iter().all(|&(id, _)| id == 8));
        assert!(drive9.commands.is_empty());
        assert!(drive9.opened.is_empty());
        assert!(sim.host().error().is_none());
    }

    #[test]
    fn open_payload_bound() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        let name = [b'A'; 40];
        {
            let mut host = sim.host();
            host.atn(&open(8, 1));
            host.send_data(&name, true);
        }
        assert_eq!(sim.run(&mut bus), [AtnMode::Listen]);
        assert_eq!(bus.record().data.as_slice(), name.as_slice());

        sim.host().unlisten();
        sim.run(&mut bus);

        let name = [b'B'; 41];
        {
            let mut host = sim.host();
            host.atn(&open(8, 1));
            host.send_data(&name, true);
        }
        assert_eq!(sim.run(&mut bus), [AtnMode::Error]);
        assert_eq!(bus.active_device(), None);
        assert_eq!(bus.record().mode, AtnMode::Error);

        drop(bus);
        assert_eq!(drive.opened.len(), 1);
        assert_eq!(drive.opened[0].1, [b'A'; 40]);
    }

    #[test]
    fn disabled_device_is_never_called() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive, 8).unwrap();
            bus.disable_device(8).unwrap();

            sim.host().atn(&[0x28, 0x60]);
            assert!(sim.run(&mut bus).is_empty());
            assert_eq!(bus.active_device(), None);
            assert_eq!(bus.record().device_id, 8);

            sim.host().atn(&[0x48, 0x6F]);
            assert!(sim.run(&mut bus).is_empty());
            assert_eq!(bus.active_device(), None);
        }

        assert!(drive.commands.is_empty());
        assert!(drive.received.is_empty());
        assert_eq!(drive.resets, 0);
        assert_eq!(drive.status_reads, 0);
    }

    #[test]
    fn listen_selects_only_registered_enabled_devices() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        for id in [4, 9, 30] {
            sim.host().listen(id, 0);
            sim.host().unlisten();
            sim.run(&mut bus);
            assert_eq!(bus.active_device(), None, "device {id}");
        }

        sim.host().listen(8, 0);
        sim.host().send_data(b"XY", true);
        assert_eq!(sim.run(&mut bus), [AtnMode::Listen]);
        assert_eq!(bus.active_device(), Some(8));

        sim.host().unlisten();
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), None);

        drop(bus);
        assert_eq!(drive.received, [(0, b'X'), (0, b'Y')]);
    }

    #[test]
    fn reset_mid_listen_resets_each_device_once() {
        let sim = Sim::new();
        let mut drive8 = Recorder::new();
        let mut drive9 = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive8, 8).unwrap();
            bus.add_device(&mut drive9, 9).unwrap();

            {
                let mut host = sim.host();
                host.atn(&open(8, 2));
                host.talker_byte(b'S', false);
                host.talker_byte(b'A', false);
                host.pull(Line::Reset);
                host.delay(5_000);
                host.release(Line::Reset);
                host.release(Line::Clock);
            }
            let modes = sim.run(&mut bus);
            assert_eq!(modes.first(), Some(&AtnMode::Reset));
            assert!(modes.iter().all(|&m| m == AtnMode::Reset));
            assert_eq!(bus.active_device(), None);
            assert!(bus.record().data.is_empty());
            assert!(!bus.port().is_pulled(Line::Data));
            assert!(!bus.port().is_pulled(Line::Clock));
        }

        for drive in [&drive8, &drive9] {
            assert_eq!(drive.resets, 1);
            assert!(drive.commands.is_empty());
            assert!(drive.opened.is_empty());
        }
    }

    #[test]
    fn held_reset_is_one_reset() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive, 8).unwrap();

            {
                let mut host = sim.host();
                host.pull(Line::Reset);
                host.delay(10_000);
                host.release(Line::Reset);
            }
            let modes = sim.run(&mut bus);
            assert!(modes.len() > 1);

            {
                let mut host = sim.host();
                host.delay(1_000);
                host.pull(Line::Reset);
                host.delay(1_000);
                host.release(Line::Reset);
            }
            sim.run(&mut bus);
        }

        assert_eq!(drive.resets, 2);
    }

    #[test]
    fn reset_with_atn_is_host_power_off() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive, 8).unwrap();

            {
                let mut host = sim.host();
                host.hold(Line::Atn);
                host.hold(Line::Reset);
                host.delay(2_000);
            }
            assert!(sim.run(&mut bus).is_empty());
        }
        assert_eq!(drive.resets, 0);
    }

    #[test]
    fn status_channel_reports_and_clears() {
        let sim = Sim::new();
        let mut drive = TestDrive::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();
        bus.reset();

        sim.host().talk(8, 15);
        sim.host().receive_until_eoi();
        assert_eq!(sim.run(&mut bus), [AtnMode::Talk]);
        assert_eq!(sim.host().received_bytes(), b"73,PICO IEC TEST DRIVE,00,00\r");
        assert!(sim.host().received_eoi());

        sim.host().clear_received();
        sim.host().untalk();
        sim.host().talk(8, 15);
        sim.host().receive_until_eoi();
        sim.host().untalk();
        sim.run(&mut bus);
        assert_eq!(sim.host().received_bytes(), b"00,OK,00,00\r");
        assert_eq!(bus.active_device(), None);
        assert!(sim.host().error().is_none());
    }

    #[test]
    fn talk_sends_device_data_with_eoi() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        drive.to_send = b"HI!".to_vec();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().talk(8, 2);
        sim.host().receive_until_eoi();
        assert_eq!(sim.run(&mut bus), [AtnMode::Talk]);
        assert_eq!(bus.active_device(), Some(8));

        sim.host().untalk();
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), None);

        let host = sim.host();
        assert!(host.error().is_none());
        assert_eq!(host.received(), [(b'H', false), (b'I', false), (b'!', true)]);
    }

    #[test]
    fn load_directory() {
        let sim = Sim::new();
        let mut drive = TestDrive::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().atn(&open(8, 0));
        sim.host().send_data(b"$", true);
        assert_eq!(sim.run(&mut bus), [AtnMode::Listen]);
        sim.host().unlisten();
        sim.run(&mut bus);

        sim.host().talk(8, 0);
        sim.host().receive_until_eoi();
        assert_eq!(sim.run(&mut bus), [AtnMode::Talk]);
        sim.host().untalk();
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), None);

        let mut expected = vec![0x01, 0x04, 0x1F, 0x04, 0x00, 0x00, 0x12, b'"'];
        expected.extend_from_slice(b"PICO IEC TEST   \" PI 2A\0");
        expected.extend_from_slice(&[0x30, 0x04, 0x00, 0x00]);
        expected.extend_from_slice(b"BLOCKS FREE.\0\0\0");

        let host = sim.host();
        assert!(host.error().is_none());
        assert_eq!(host.received_bytes(), expected);
        assert!(host.received_eoi());
        assert_eq!(host.received().iter().filter(|&&(_, eoi)| eoi).count(), 1);
    }

    #[test]
    fn empty_channel_is_file_not_found() {
        let sim = Sim::new();
        let mut drive = TestDrive::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().talk(8, 2);
        sim.host().listener_byte();
        assert_eq!(sim.run(&mut bus), [AtnMode::Talk]);
        // The host times out waiting for the first byte
        assert!(sim.host().error().is_some());
        assert!(sim.host().received().is_empty());
        assert!(!bus.port().is_pulled(Line::Clock));
        assert!(!bus.port().is_pulled(Line::Data));

        sim.host().reset_error();
        sim.host().untalk();
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), None);
    }

    #[test]
    fn malformed_command_recovers_at_next_atn() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().atn(&[0x28, 0x75]);
        assert_eq!(sim.run(&mut bus), [AtnMode::Error]);
        assert_eq!(bus.active_device(), None);
        assert_eq!(bus.record().code, 0x75);

        sim.host().release_all();
        sim.host().delay(100);
        sim.host().atn(&open(8, 3));
        sim.host().send_data(b"$", true);
        sim.host().unlisten();
        assert_eq!(sim.run(&mut bus), [AtnMode::Listen]);

        drop(bus);
        assert_eq!(drive.opened, [(3, b"$".to_vec())]);
    }

    #[test]
    fn stalled_talker_times_out() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        {
            let mut host = sim.host();
            host.atn(&[0x28, 0x62]);
            host.talker_byte(b'1', false);
            host.delay(150_000);
        }
        assert_eq!(sim.run(&mut bus), [AtnMode::Error]);
        assert_eq!(bus.active_device(), None);
        assert!(bus.state().contains(IecState::ERROR));
        assert!(!bus.port().is_pulled(Line::Data));

        drop(bus);
        assert_eq!(drive.received, [(2, b'1')]);
    }

    #[test]
    fn atn_ends_listen_data_phase() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        {
            let mut host = sim.host();
            host.atn(&[0x28, 0x61]);
            host.talker_byte(b'A', false);
            host.unlisten();
        }
        assert_eq!(sim.run(&mut bus), [AtnMode::Cmd]);
        assert_eq!(bus.active_device(), None);

        drop(bus);
        assert_eq!(drive.received, [(1, b'A')]);
    }

    #[test]
    fn close_is_dispatched() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().atn(&[0x28, 0xE2]);
        sim.host().delay(100);
        sim.host().unlisten();
        assert_eq!(sim.run(&mut bus), [AtnMode::Listen]);

        drop(bus);
        assert_eq!(drive.closed, [2]);
    }

    #[test]
    fn close_then_unlisten_in_one_atn_sequence() {
        let sim = Sim::new();
        let mut drive8 = Recorder::new();
        let mut drive9 = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive8, 8).unwrap();
            bus.add_device(&mut drive9, 9).unwrap();

            sim.host().atn(&[0x28, 0xE2, 0x3F]);
            sim.host().release(Line::Clock);
            assert!(sim.run(&mut bus).is_empty());
            assert_eq!(bus.active_device(), None);
            assert_eq!(bus.record().primary, CommandKind::Unlisten);
            assert!(!bus.record().has_secondary());
            assert!(!bus.port().is_pulled(Line::Data));
        }

        assert_eq!(drive8.closed, [2]);
        assert_eq!(drive8.commands, [(8, CommandKind::Close)]);
        assert!(drive9.commands.is_empty());
        assert!(sim.host().error().is_none());
    }

    #[test]
    fn superseded_commands_only_reach_enabled_devices() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive, 8).unwrap();
            bus.disable_device(8).unwrap();

            // CLOSE to a disabled device, then OPEN with no name to an
            // unregistered one
            sim.host().atn(&[0x28, 0xE2, 0x3F, 0x29, 0xF1, 0x3F]);
            sim.host().release(Line::Clock);
            assert!(sim.run(&mut bus).is_empty());

            bus.enable_device(8).unwrap();
            sim.host().atn(&[0x28, 0xF3, 0x3F]);
            sim.host().release(Line::Clock);
            sim.run(&mut bus);
        }

        assert!(drive.closed.is_empty());
        assert_eq!(drive.opened, [(3, Vec::new())]);
    }

    #[test]
    fn moving_active_device_to_disabled_id_forgets_it() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();
        bus.disable_device(9).unwrap();

        sim.host().atn(&[0x28, 0xE0]);
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), Some(8));

        bus.change_device_id(8, 9).unwrap();
        assert_eq!(bus.active_device(), None);
        assert!(!bus.is_device_enabled(9));
        assert!(bus.registry().is_registered(9));
    }

    #[test]
    fn listen_and_talk_select_every_assignable_id() {
        for id in MIN_DEVICE_ID..=MAX_DEVICE_ID {
            let sim = Sim::new();
            let mut drive = Recorder::new();
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut drive, id).unwrap();

            sim.host().atn(&[IecCommand::Listen(id).to_byte(), 0x61]);
            sim.host().send_data(b"Z", true);
            assert_eq!(sim.run(&mut bus), [AtnMode::Listen], "listen {id}");
            assert_eq!(bus.active_device(), Some(id));

            sim.host().unlisten();
            sim.host().talk(id, 2);
            sim.host().listener_byte();
            assert_eq!(sim.run(&mut bus), [AtnMode::Talk], "talk {id}");
            assert_eq!(bus.active_device(), Some(id));

            sim.host().reset_error();
            sim.host().untalk();
            sim.run(&mut bus);
            assert_eq!(bus.active_device(), None);
        }
    }

    #[test]
    fn change_and_remove_follow_active_device() {
        let sim = Sim::new();
        let mut drive = Recorder::new();
        let mut bus = IecBus::new(sim.port());
        bus.add_device(&mut drive, 8).unwrap();

        sim.host().atn(&[0x28, 0xE0]);
        sim.run(&mut bus);
        assert_eq!(bus.active_device(), Some(8));

        bus.change_device_id(8, 9).unwrap();
        assert_eq!(bus.active_device(), Some(9));
        assert_eq!(bus.device_by_id(9).map(|d| d.device_id()), Some(9));

        bus.remove_device(9).unwrap();
        assert_eq!(bus.active_device(), None);
        assert_eq!(bus.num_devices(), 0);
    }

    #[test]
    fn shutdown_reaches_every_device() {
        let sim = Sim::new();
        let mut a = Recorder::new();
        let mut b = Recorder::new();
        {
            let mut bus = IecBus::new(sim.port());
            bus.add_device(&mut a, 8).unwrap();
            bus.add_device(&mut b, 12).unwrap();
            bus.disable_device(12).unwrap();
            bus.shutdown();
            assert!(!bus.is_device_enabled(12));
        }
        assert_eq!(a.shutdowns, 1);
        assert_eq!(b.shutdowns, 1);
    }
}
