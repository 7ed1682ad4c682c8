//! The stage's persistent configuration record.
//!
//! The record layout corresponds byte for byte to the configuration
//! packet exchanged with the master controller and must not be changed.
//! Several fields are black boxes even upstream (`combined_*_threshold`,
//! `reserved`, the padding tail); they are passed through unmodified.

use modular_bitfield::prelude::*;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::api::PANEL_COUNT;
use crate::error::StageError;
use crate::legacy;

/// Size of the configuration record. Adding fields eats into the padding
/// tail instead of growing the record, so the ABI with the firmware never
/// changes.
pub const CONFIG_SIZE: usize = 250;

/// Packed flags byte of the configuration record.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFlags {
    /// If set, panels use the pressed animation when pressed and
    /// `step_color` is ignored; otherwise panels light solid in
    /// `step_color`. Honored by master firmware 4 and up.
    pub auto_lighting_use_pressed_animations: bool,
    /// If set, panels are using FSRs, otherwise load cells.
    pub fsr: bool,
    #[skip]
    unused: B6,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// One value per FSR sensor of a panel, in wire order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct PackedSensors {
    pub up: u8,
    pub right: u8,
    pub down: u8,
    pub left: u8,
}

/// Per-panel thresholds. Which group applies depends on the stage's
/// sensor technology ([`ConfigFlags::fsr`]), not on a type tag. Setting a
/// threshold to 0xFF disables it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct PanelSettings {
    pub load_cell_low_threshold: u8,
    pub load_cell_high_threshold: u8,
    pub fsr_low_threshold: PackedSensors,
    pub fsr_high_threshold: PackedSensors,
    /// Purpose unknown upstream; pass through unchanged.
    pub combined_low_threshold: U16,
    /// Purpose unknown upstream; pass through unchanged.
    pub combined_high_threshold: U16,
    /// Reserved for future expansion; must be left unchanged.
    pub reserved: U16,
}

/// The configuration for a connected stage, as stored on the device.
///
/// Panels are indexed in panel array order everywhere
/// (see [`crate::api::Panel`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct StageConfig {
    /// Firmware version of the master controller. Filled in by the device
    /// from version 2 on; 0xFF on version 1.
    pub master_version: u8,
    /// Version of this record's contents, unrelated to the firmware
    /// version: 0xFF predates version tracking, 2 added the per-panel
    /// thresholds, 3 added `debounce_delay_milliseconds`.
    pub config_version: u8,
    /// See [`ConfigFlags`]; use [`StageConfig::flags`] for typed access.
    pub flags: u8,
    pub debounce_nodelay_milliseconds: U16,
    pub debounce_delay_milliseconds: U16,
    pub panel_debounce_microseconds: U16,
    pub auto_calibration_max_deviation: u8,
    pub bad_sensor_minimum_delay_seconds: u8,
    pub auto_calibration_averages_per_update: U16,
    pub auto_calibration_samples_per_average: U16,
    /// The maximum tare value to calibrate to (except on startup).
    pub auto_calibration_max_tare: U16,
    /// Which sensors on each panel are populated; use
    /// [`StageConfig::enabled_sensors`] for typed access.
    pub enabled_sensors: [u8; 5],
    /// How long the master waits for a lights command before resuming
    /// auto-lights, in 128 ms units.
    pub auto_lights_timeout: u8,
    /// Auto-lighting color per panel, scaled to 0-170.
    pub step_color: [Rgb; PANEL_COUNT],
    /// Default color of the underside LED strips, 0-255.
    pub platform_strip_color: Rgb,
    /// Which panels the master's built-in auto-lighting covers;
    /// bit 0 = panel 0 and so on.
    pub auto_light_panel_mask: U16,
    /// 90-degree rotation steps. Unused by current firmware.
    pub panel_rotation: u8,
    pub panel_settings: [PanelSettings; PANEL_COUNT],
    /// Internal tunable; leave unchanged.
    pub pre_details_delay_milliseconds: u8,
    /// Keeps the record at [`CONFIG_SIZE`] bytes as fields are added.
    /// Echo back whatever the device sent here.
    pub padding: [u8; 49],
}

const _: () = assert!(size_of::<StageConfig>() == CONFIG_SIZE);

/// Which of a panel's four sensors are populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledSensors {
    pub up: bool,
    pub right: bool,
    pub down: bool,
    pub left: bool,
}

impl EnabledSensors {
    pub fn all() -> Self {
        Self {
            up: true,
            right: true,
            down: true,
            left: true,
        }
    }

    fn from_nibble(nibble: u8) -> Self {
        Self {
            up: nibble & 0x8 != 0,
            right: nibble & 0x4 != 0,
            down: nibble & 0x2 != 0,
            left: nibble & 0x1 != 0,
        }
    }

    fn to_nibble(self) -> u8 {
        (u8::from(self.up) << 3)
            | (u8::from(self.right) << 2)
            | (u8::from(self.down) << 1)
            | u8::from(self.left)
    }
}

impl StageConfig {
    pub fn flags(&self) -> ConfigFlags {
        ConfigFlags::from_bytes([self.flags])
    }

    pub fn set_flags(&mut self, flags: ConfigFlags) {
        self.flags = flags.into_bytes()[0];
    }

    pub fn is_fsr(&self) -> bool {
        self.flags().fsr()
    }

    /// Unpack the five-byte enabled-sensors bitmap, two panels per byte.
    ///
    /// The nibble order is a documented black-box layout: panel 2k sits
    /// in the low nibble of byte k, panel 2k+1 in the high nibble, and
    /// the final high nibble is the four unused trailing bits.
    pub fn enabled_sensors(&self) -> [EnabledSensors; PANEL_COUNT] {
        let mut out = [EnabledSensors::default(); PANEL_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            let byte = self.enabled_sensors[i / 2];
            let nibble = if i % 2 == 0 { byte & 0xF } else { byte >> 4 };
            *slot = EnabledSensors::from_nibble(nibble);
        }
        out
    }

    pub fn set_enabled_sensors(&mut self, panels: [EnabledSensors; PANEL_COUNT]) {
        let mut bytes = [0u8; 5];
        for (i, panel) in panels.iter().enumerate() {
            if i % 2 == 0 {
                bytes[i / 2] |= panel.to_nibble();
            } else {
                bytes[i / 2] |= panel.to_nibble() << 4;
            }
        }
        self.enabled_sensors = bytes;
    }

    /// Parse a current-format record. The slice must already be trimmed
    /// of the response's two-byte header and one-byte trailer.
    pub fn decode(record: &[u8]) -> Result<Self, StageError> {
        Self::read_from_bytes(record).map_err(|_| {
            StageError::InvalidPacket(format!(
                "configuration record must be exactly {CONFIG_SIZE} bytes, got {}",
                record.len()
            ))
        })
    }

    pub fn encode(&self) -> [u8; CONFIG_SIZE] {
        let mut out = [0u8; CONFIG_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

/// A decoded configuration together with what is needed to write it back
/// to the firmware generation it came from.
///
/// Instances only come out of [`ConfigPacket::decode`]; there is no way
/// to encode a configuration that was never read from a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigPacket {
    pub config: StageConfig,
    /// For pre-v5 firmware, the record length the device actually sent.
    legacy_received_len: Option<usize>,
}

impl ConfigPacket {
    /// Decode a get-config response record for the given firmware
    /// generation. Pre-v5 records are migrated to the current shape.
    pub fn decode(record: &[u8], firmware_version: u16) -> Result<Self, StageError> {
        if firmware_version >= 5 {
            Ok(Self {
                config: StageConfig::decode(record)?,
                legacy_received_len: None,
            })
        } else {
            let (config, received_len) = legacy::decode_legacy(record)?;
            Ok(Self {
                config,
                legacy_received_len: Some(received_len),
            })
        }
    }

    /// The same write-back state with the configuration replaced.
    pub fn with_config(&self, config: StageConfig) -> Self {
        Self {
            config,
            legacy_received_len: self.legacy_received_len,
        }
    }

    /// Serialize for the given firmware generation, truncating the legacy
    /// record back to the length the device originally sent when it was a
    /// short read.
    pub fn encode(&self, firmware_version: u16) -> Vec<u8> {
        if firmware_version >= 5 {
            self.config.as_bytes().to_vec()
        } else {
            let received_len = self
                .legacy_received_len
                .unwrap_or(legacy::LEGACY_CONFIG_SIZE);
            legacy::encode_legacy(&self.config, received_len)
        }
    }
}
