//! Command bytes and transport constants for the stage protocol.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

pub const STAGE_USB_VENDOR_ID: u16 = 0x2341;
pub const STAGE_USB_PRODUCT_ID: u16 = 0x8037;

/// Inbound report carrying the panel on/off bitmask.
pub const HID_REPORT_INPUT_STATE: u8 = 0x03;
/// Outbound report carrying command frames.
pub const HID_REPORT_OUTPUT: u8 = 0x05;
/// Inbound report carrying command/response frames.
pub const HID_REPORT_INPUT: u8 = 0x06;

pub const PANEL_COUNT: usize = 9;
pub const SENSOR_COUNT: usize = 4;

/// Command bytes are the ASCII codes of single letters and must be
/// preserved bit-for-bit for device compatibility. The device answers a
/// lowercase `'i'` query with an uppercase `'I'` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ApiCommand {
    GetDeviceInfo = 0x69,      // 'i'
    DeviceInfoResponse = 0x49, // 'I'
    GetConfig = 0x67,          // 'g'
    GetConfigV5 = 0x47,        // 'G'
    WriteConfig = 0x77,        // 'w'
    WriteConfigV5 = 0x57,      // 'W'
    FactoryReset = 0x66,       // 'f'
    SetLightStrip = 0x4C,      // 'L'
    ForceRecalibration = 0x43, // 'C'
    GetSensorTestData = 0x79,  // 'y'
    SetSerialNumbers = 0x73,   // 's'
    SetPanelTestMode = 0x74,   // 't'

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl ApiCommand {
    /// Configuration writes are rate limited by the scheduler; everything
    /// else is forwarded as soon as the channel is free.
    pub fn is_config_write(self) -> bool {
        matches!(self, ApiCommand::WriteConfig | ApiCommand::WriteConfigV5)
    }
}

/// One of the nine step positions, in panel array order. The physical
/// layout is a 3x3 grid with numpad-style numbering (7 8 9 / 4 5 6 /
/// 1 2 3, top row first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Panel {
    UpLeft = 0,
    Up = 1,
    UpRight = 2,
    Left = 3,
    Center = 4,
    Right = 5,
    DownLeft = 6,
    Down = 7,
    DownRight = 8,
}

impl Panel {
    pub const ALL: [Panel; PANEL_COUNT] = [
        Panel::UpLeft,
        Panel::Up,
        Panel::UpRight,
        Panel::Left,
        Panel::Center,
        Panel::Right,
        Panel::DownLeft,
        Panel::Down,
        Panel::DownRight,
    ];
}

/// FSR sensor positions within a panel, in wire order. Load-cell stages
/// carry four corner sensors instead; the positions then have no fixed
/// meaning and only the index matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Sensor {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}
