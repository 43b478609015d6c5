//! Devices which can be attached to the bus.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod test_drive;

pub use test_drive::TestDrive;
