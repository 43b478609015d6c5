//! The firmware's entry point.
//!
//! The firmware emulates a single [`TestDrive`] at device 8.  All of the
//! work happens in one loop, servicing the bus and feeding the watchdog.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use static_cell::StaticCell;

use crate::bus::IecBus;
use crate::constants::TEST_DRIVE_DEVICE_ID;
use crate::devices::TestDrive;
use crate::infra::gpio::{IecGpios, create_iec_port};
use crate::infra::watchdog::{Watchdog, WatchdogClock};
use crate::protocol::AtnMode;
use crate::util::built::log_fw_info;

// The drive outlives main(), as the bus borrows it.
static TEST_DRIVE: StaticCell<TestDrive> = StaticCell::new();

/// Called by the binary's main().  Never returns.
pub fn common_main(bin_name: &str) -> ! {
    let p = embassy_rp::init(Default::default());

    log_fw_info(bin_name);

    let mut watchdog = Watchdog::new(p.WATCHDOG);
    watchdog.start();

    let port = create_iec_port(
        IecGpios {
            clock_in: p.PIN_19.into(),
            clock_out: p.PIN_11.into(),
            data_in: p.PIN_20.into(),
            data_out: p.PIN_13.into(),
            atn_in: p.PIN_17.into(),
            atn_out: p.PIN_12.into(),
            reset_in: p.PIN_18.into(),
            reset_out: p.PIN_10.into(),
            srq_in: p.PIN_16.into(),
            srq_out: p.PIN_14.into(),
        },
        WatchdogClock::new(watchdog),
    );

    let mut bus = IecBus::new(port);
    let drive = TEST_DRIVE.init(TestDrive::new());
    if let Err(e) = bus.add_device(drive, TEST_DRIVE_DEVICE_ID) {
        error!("Failed to add test drive: {}", e);
    }

    info!("Servicing IEC bus");
    let mut last_mode = AtnMode::Idle;
    loop {
        let mode = bus.service();
        if mode != last_mode {
            debug!("Bus mode: {}", mode);
            last_mode = mode;
        }
        bus.port().keep_alive();
    }
}
