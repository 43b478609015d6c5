//! This module contains constants for pico-iec.
//!
//! The IEC bus timings are protocol facts, rather than tunables.  Where the
//! Commodore documentation gives both a minimum and a typical value, the
//! comment says which one we use.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

//
// Device ids
//

/// Lowest device id that may be assigned.  0-3 are reserved for the
/// keyboard, datasette, RS-232 and screen.
pub const MIN_DEVICE_ID: u8 = 4;

/// Highest device id that may be assigned.  31 can't be used as LISTEN 31
/// and TALK 31 are UNLISTEN and UNTALK.
pub const MAX_DEVICE_ID: u8 = 30;

/// Number of slots in the device registry - one per possible id.
pub const NUM_DEVICE_SLOTS: usize = MAX_DEVICE_ID as usize + 1;

/// Enabled device bitmask with all assignable ids (4-30) enabled.
pub const DEVICE_MASK: u32 = 0b0111_1111_1111_1111_1111_1111_1111_0000;

const_assert!(DEVICE_MASK.trailing_zeros() == MIN_DEVICE_ID as u32);
const_assert!(32 - DEVICE_MASK.leading_zeros() == MAX_DEVICE_ID as u32 + 1);

/// The command/status channel.
pub const STATUS_CHANNEL: u8 = 15;

//
// ATN commands
//

pub const ATN_CMD_GLOBAL: u8 = 0x00;
pub const ATN_CMD_LISTEN: u8 = 0x20;
pub const ATN_CMD_UNLISTEN: u8 = 0x3F;
pub const ATN_CMD_TALK: u8 = 0x40;
pub const ATN_CMD_UNTALK: u8 = 0x5F;
pub const ATN_CMD_DATA: u8 = 0x60;
pub const ATN_CMD_CLOSE: u8 = 0xE0;
pub const ATN_CMD_OPEN: u8 = 0xF0;

/// Device ids live in the low 5 bits of LISTEN and TALK.
pub const ATN_DEVICE_MASK: u8 = 0x1F;

/// Channels (secondary addresses) live in the low 4 bits of DATA, CLOSE
/// and OPEN.
pub const ATN_CHANNEL_MASK: u8 = 0x0F;

/// Maximum number of bytes in the payload following an OPEN, i.e. the file
/// name or command string.
pub const ATN_CMD_MAX_LENGTH: usize = 40;

/// Maximum length of an encoded status string, "NN,MESSAGE,TT,SS\r".
pub const STATUS_MAX_LENGTH: usize = 48;

//
// Listings
//

/// Load address sent at the start of a directory listing.  The host
/// relocates it to the start of BASIC.
pub const LISTING_LOAD_ADDRESS: u16 = 0x0401;

/// Maximum text in a single listing line.  Longer lines are truncated.
pub const LISTING_TEXT_MAX_LENGTH: usize = 32;

/// Length of a disk name in a listing header.  Shorter names are padded.
pub const DISK_NAME_LENGTH: usize = 16;

// The header - RVS ON, the quoted name and a space - must leave room for
// the disk id
const_assert!(DISK_NAME_LENGTH + 4 + 5 <= LISTING_TEXT_MAX_LENGTH);

//
// IEC bus timings
//

/// Max ATN response required time.  Also used as the general frame
/// handshake timeout.
pub const IEC_T_AT: Duration = Duration::from_micros(1000);

/// Max frame handshake time (20 typical).
pub const IEC_T_F: Duration = Duration::from_micros(1000);

/// Min EOI response time (250 typical).  A listener which has not seen the
/// talker pull CLK within this time after it released DATA treats the byte
/// as the last one.
pub const IEC_T_YE: Duration = Duration::from_micros(200);

/// Min EOI response hold time.  How long the listener holds DATA to
/// acknowledge EOI.
pub const IEC_T_EI: Duration = Duration::from_micros(60);

/// Min time between bytes.
pub const IEC_T_BB: Duration = Duration::from_micros(100);

/// Min talk-attention ack hold time.
pub const IEC_T_DA: Duration = Duration::from_micros(80);

/// Talker bit setup time.  We use 60us rather than the 20us minimum, as the
/// C64 samples DATA from a polled loop.
pub const IEC_T_S: Duration = Duration::from_micros(60);

/// Talker data valid time.  As for `IEC_T_S` we allow the C64 plenty of
/// time.
pub const IEC_T_V: Duration = Duration::from_micros(60);

/// Time to let the bus settle after acknowledging ATN, before we start
/// reading the command.
pub const ATN_PREDELAY: Duration = Duration::from_micros(50);

// A listener must spot the talker's non-EOI response well inside the EOI
// window, or every byte would look like the last one.
const_assert!(IEC_T_YE.as_micros() > IEC_T_EI.as_micros());
const_assert!(IEC_T_F.as_micros() > IEC_T_YE.as_micros());

/// How long a talker waits for the listener to be ready for data, and a
/// listener waits for the talker to be ready to send.  The protocol allows
/// either side to hold off forever, but we must not freeze the only thread
/// servicing the bus.
pub const HOLD_OFF_TIMEOUT: Duration = Duration::from_millis(100);

/// How long we wait, with ATN asserted, for the host to send the next
/// command byte or release ATN.
pub const ATN_BYTE_TIMEOUT: Duration = Duration::from_millis(10);

//
// Firmware
//

/// Hardware watchdog timeout.  The watchdog is fed between `service()`
/// calls, and once per byte transferred.
pub const WATCHDOG_TIMER: Duration = Duration::from_secs(1);

// The longest gap between feeds is a few bounded waits for one byte.
const_assert!(HOLD_OFF_TIMEOUT.as_micros() * 4 < WATCHDOG_TIMER.as_micros());

/// The device id the firmware's test drive starts at.
pub const TEST_DRIVE_DEVICE_ID: u8 = 8;
