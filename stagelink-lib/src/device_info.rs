//! Decode of the device-info response record.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::api::ApiCommand;
use crate::error::StageError;

pub const DEVICE_INFO_SIZE: usize = 23;

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RawDeviceInfo {
    /// Always 'I'.
    cmd: u8,
    packet_size: u8,
    /// '0' for player 1, '1' for player 2. The characters, not the
    /// numbers.
    player: u8,
    unused2: u8,
    serial: [u8; 16],
    firmware_version: U16,
    /// Always '\n'.
    unused3: u8,
}

const _: () = assert!(size_of::<RawDeviceInfo>() == DEVICE_INFO_SIZE);

/// Identity of a connected stage. The firmware version gates the command
/// set and configuration record shape for every other operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// 1-based player slot ('0' on the wire is player 1).
    pub player: u8,
    /// Serial number rendered as uppercase hex.
    pub serial: String,
    pub firmware_version: u16,
}

impl DeviceInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, StageError> {
        let (raw, _) = RawDeviceInfo::ref_from_prefix(payload).map_err(|_| {
            StageError::InsufficientData {
                expected: DEVICE_INFO_SIZE,
                actual: payload.len(),
            }
        })?;
        if ApiCommand::from(raw.cmd) != ApiCommand::DeviceInfoResponse {
            return Err(StageError::ResponseMismatch {
                expected: ApiCommand::DeviceInfoResponse.into(),
                actual: raw.cmd,
            });
        }
        Ok(Self {
            player: raw.player.wrapping_sub(b'0').wrapping_add(1),
            serial: hex::encode_upper(raw.serial),
            firmware_version: raw.firmware_version.get(),
        })
    }
}
