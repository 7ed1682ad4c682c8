//! Compatibility shim for the pre-v5 firmware configuration record.
//!
//! Old master firmware dumps a differently shaped struct, and may send
//! fewer bytes than the full record when trailing fields postdate it. The
//! field correspondence to the current record is kept as one exhaustive
//! mapping table so it can be audited and tested entry by entry.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::api::{PANEL_COUNT, Panel};
use crate::config::{Rgb, StageConfig};
use crate::error::StageError;

/// Full size of the legacy record.
pub const LEGACY_CONFIG_SIZE: usize = 240;
/// Shortest decodable legacy record: everything through `config_version`.
pub const LEGACY_CONFIG_MIN_SIZE: usize = 31;
/// Devices that sent a record this short expect an equally short record
/// written back; longer records are always written in full.
pub const LEGACY_SHORT_CONFIG_LIMIT: usize = 128;

/// The legacy configuration record.
///
/// The first four threshold groups carry the original firmware's
/// historical group names: "up", "cardinal", "center" and "corner". Which
/// panel each group lands on in the current record is a documented quirk
/// with no logical pattern; see [`FIELD_MAPPINGS`]. The remaining five
/// panels and the debounce delay were appended later and are gated on
/// `config_version`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct LegacyConfig {
    pub unused1: [u8; 6],
    pub master_debounce_milliseconds: U16,
    pub up_threshold_low: u8,
    pub up_threshold_high: u8,
    pub cardinal_threshold_low: u8,
    pub cardinal_threshold_high: u8,
    pub center_threshold_low: u8,
    pub center_threshold_high: u8,
    pub corner_threshold_low: u8,
    pub corner_threshold_high: u8,
    pub panel_debounce_microseconds: U16,
    pub auto_calibration_period_milliseconds: U16,
    pub auto_calibration_max_deviation: u8,
    pub bad_sensor_minimum_delay_seconds: u8,
    pub auto_calibration_averages_per_update: U16,
    pub unused7: U16,
    pub auto_calibration_samples_per_average: U16,
    pub unused8: u8,
    pub master_version: u8,
    /// 0xFF predates version tracking; 2 added the per-panel thresholds
    /// below; 3 added `debounce_delay_milliseconds`.
    pub config_version: u8,
    pub unused9: [u8; 2],
    pub enabled_sensors: [u8; 5],
    pub auto_lights_timeout: u8,
    pub step_color: [Rgb; PANEL_COUNT],
    pub platform_strip_color: Rgb,
    pub auto_light_panel_mask: U16,
    pub panel_rotation: u8,
    pub up_left_threshold_low: u8,
    pub up_left_threshold_high: u8,
    pub left_threshold_low: u8,
    pub left_threshold_high: u8,
    pub right_threshold_low: u8,
    pub right_threshold_high: u8,
    pub down_left_threshold_low: u8,
    pub down_left_threshold_high: u8,
    pub down_right_threshold_low: u8,
    pub down_right_threshold_high: u8,
    pub debounce_delay_milliseconds: U16,
    pub pre_details_delay_milliseconds: u8,
    pub padding: [u8; 155],
}

const _: () = assert!(size_of::<LegacyConfig>() == LEGACY_CONFIG_SIZE);

/// One entry of the old/new field correspondence.
pub(crate) struct FieldMapping {
    pub name: &'static str,
    /// Minimum legacy `config_version` that carries the field when
    /// reading an old record; 0 applies always.
    pub min_config_version: u8,
    pub old_to_new: fn(&LegacyConfig, &mut StageConfig),
    pub new_to_old: fn(&StageConfig, &mut LegacyConfig),
}

/// The exhaustive field correspondence. Fields absent here are either
/// legacy-only (`master_debounce_milliseconds`,
/// `auto_calibration_period_milliseconds`, the unused fill) or new-only
/// (flags, no-delay debounce, max tare, FSR/combined thresholds), and are
/// left at their defaults on the other side.
pub(crate) static FIELD_MAPPINGS: &[FieldMapping] = &[
    FieldMapping {
        name: "master_version",
        min_config_version: 0,
        old_to_new: |o, n| n.master_version = o.master_version,
        new_to_old: |n, o| o.master_version = n.master_version,
    },
    FieldMapping {
        name: "config_version",
        min_config_version: 0,
        old_to_new: |o, n| n.config_version = o.config_version,
        new_to_old: |n, o| o.config_version = n.config_version,
    },
    FieldMapping {
        name: "panel_debounce_microseconds",
        min_config_version: 0,
        old_to_new: |o, n| n.panel_debounce_microseconds = o.panel_debounce_microseconds,
        new_to_old: |n, o| o.panel_debounce_microseconds = n.panel_debounce_microseconds,
    },
    FieldMapping {
        name: "auto_calibration_max_deviation",
        min_config_version: 0,
        old_to_new: |o, n| n.auto_calibration_max_deviation = o.auto_calibration_max_deviation,
        new_to_old: |n, o| o.auto_calibration_max_deviation = n.auto_calibration_max_deviation,
    },
    FieldMapping {
        name: "bad_sensor_minimum_delay_seconds",
        min_config_version: 0,
        old_to_new: |o, n| n.bad_sensor_minimum_delay_seconds = o.bad_sensor_minimum_delay_seconds,
        new_to_old: |n, o| o.bad_sensor_minimum_delay_seconds = n.bad_sensor_minimum_delay_seconds,
    },
    FieldMapping {
        name: "auto_calibration_averages_per_update",
        min_config_version: 0,
        old_to_new: |o, n| {
            n.auto_calibration_averages_per_update = o.auto_calibration_averages_per_update;
        },
        new_to_old: |n, o| {
            o.auto_calibration_averages_per_update = n.auto_calibration_averages_per_update;
        },
    },
    FieldMapping {
        name: "auto_calibration_samples_per_average",
        min_config_version: 0,
        old_to_new: |o, n| {
            n.auto_calibration_samples_per_average = o.auto_calibration_samples_per_average;
        },
        new_to_old: |n, o| {
            o.auto_calibration_samples_per_average = n.auto_calibration_samples_per_average;
        },
    },
    FieldMapping {
        name: "enabled_sensors",
        min_config_version: 0,
        old_to_new: |o, n| n.enabled_sensors = o.enabled_sensors,
        new_to_old: |n, o| o.enabled_sensors = n.enabled_sensors,
    },
    FieldMapping {
        name: "auto_lights_timeout",
        min_config_version: 0,
        old_to_new: |o, n| n.auto_lights_timeout = o.auto_lights_timeout,
        new_to_old: |n, o| o.auto_lights_timeout = n.auto_lights_timeout,
    },
    FieldMapping {
        name: "step_color",
        min_config_version: 0,
        old_to_new: |o, n| n.step_color = o.step_color,
        new_to_old: |n, o| o.step_color = n.step_color,
    },
    FieldMapping {
        name: "platform_strip_color",
        min_config_version: 0,
        old_to_new: |o, n| n.platform_strip_color = o.platform_strip_color,
        new_to_old: |n, o| o.platform_strip_color = n.platform_strip_color,
    },
    FieldMapping {
        name: "auto_light_panel_mask",
        min_config_version: 0,
        old_to_new: |o, n| n.auto_light_panel_mask = o.auto_light_panel_mask,
        new_to_old: |n, o| o.auto_light_panel_mask = n.auto_light_panel_mask,
    },
    FieldMapping {
        name: "panel_rotation",
        min_config_version: 0,
        old_to_new: |o, n| n.panel_rotation = o.panel_rotation,
        new_to_old: |n, o| o.panel_rotation = n.panel_rotation,
    },
    FieldMapping {
        name: "pre_details_delay_milliseconds",
        min_config_version: 0,
        old_to_new: |o, n| n.pre_details_delay_milliseconds = o.pre_details_delay_milliseconds,
        new_to_old: |n, o| o.pre_details_delay_milliseconds = n.pre_details_delay_milliseconds,
    },
    // The four historical threshold groups. The panel each lands on is a
    // quirk inherited from the original firmware; do not "fix" it.
    FieldMapping {
        name: "up_threshold (\"up\" group)",
        min_config_version: 0,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::Up as usize];
            settings.load_cell_low_threshold = o.up_threshold_low;
            settings.load_cell_high_threshold = o.up_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::Up as usize];
            o.up_threshold_low = settings.load_cell_low_threshold;
            o.up_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "cardinal_threshold (\"cardinal\" group, lands on Down)",
        min_config_version: 0,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::Down as usize];
            settings.load_cell_low_threshold = o.cardinal_threshold_low;
            settings.load_cell_high_threshold = o.cardinal_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::Down as usize];
            o.cardinal_threshold_low = settings.load_cell_low_threshold;
            o.cardinal_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "center_threshold (\"center\" group)",
        min_config_version: 0,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::Center as usize];
            settings.load_cell_low_threshold = o.center_threshold_low;
            settings.load_cell_high_threshold = o.center_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::Center as usize];
            o.center_threshold_low = settings.load_cell_low_threshold;
            o.center_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "corner_threshold (\"corner\" group, lands on UpRight)",
        min_config_version: 0,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::UpRight as usize];
            settings.load_cell_low_threshold = o.corner_threshold_low;
            settings.load_cell_high_threshold = o.corner_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::UpRight as usize];
            o.corner_threshold_low = settings.load_cell_low_threshold;
            o.corner_threshold_high = settings.load_cell_high_threshold;
        },
    },
    // Thresholds for the remaining five panels, added with config
    // version 2.
    FieldMapping {
        name: "up_left_threshold",
        min_config_version: 2,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::UpLeft as usize];
            settings.load_cell_low_threshold = o.up_left_threshold_low;
            settings.load_cell_high_threshold = o.up_left_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::UpLeft as usize];
            o.up_left_threshold_low = settings.load_cell_low_threshold;
            o.up_left_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "left_threshold",
        min_config_version: 2,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::Left as usize];
            settings.load_cell_low_threshold = o.left_threshold_low;
            settings.load_cell_high_threshold = o.left_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::Left as usize];
            o.left_threshold_low = settings.load_cell_low_threshold;
            o.left_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "right_threshold",
        min_config_version: 2,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::Right as usize];
            settings.load_cell_low_threshold = o.right_threshold_low;
            settings.load_cell_high_threshold = o.right_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::Right as usize];
            o.right_threshold_low = settings.load_cell_low_threshold;
            o.right_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "down_left_threshold",
        min_config_version: 2,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::DownLeft as usize];
            settings.load_cell_low_threshold = o.down_left_threshold_low;
            settings.load_cell_high_threshold = o.down_left_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::DownLeft as usize];
            o.down_left_threshold_low = settings.load_cell_low_threshold;
            o.down_left_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "down_right_threshold",
        min_config_version: 2,
        old_to_new: |o, n| {
            let settings = &mut n.panel_settings[Panel::DownRight as usize];
            settings.load_cell_low_threshold = o.down_right_threshold_low;
            settings.load_cell_high_threshold = o.down_right_threshold_high;
        },
        new_to_old: |n, o| {
            let settings = &n.panel_settings[Panel::DownRight as usize];
            o.down_right_threshold_low = settings.load_cell_low_threshold;
            o.down_right_threshold_high = settings.load_cell_high_threshold;
        },
    },
    FieldMapping {
        name: "debounce_delay_milliseconds",
        min_config_version: 3,
        old_to_new: |o, n| n.debounce_delay_milliseconds = o.debounce_delay_milliseconds,
        new_to_old: |n, o| o.debounce_delay_milliseconds = n.debounce_delay_milliseconds,
    },
];

/// A gated mapping applies old-to-new only when the record's version says
/// the field was actually written; 0xFF means version tracking itself is
/// absent.
fn gate_open(config_version: u8, min: u8) -> bool {
    min == 0 || (config_version != 0xFF && config_version >= min)
}

/// Build a current-format record from a legacy one, seeded from the
/// all-zero template.
pub fn old_to_new(old: &LegacyConfig) -> StageConfig {
    let mut new = StageConfig::new_zeroed();
    for mapping in FIELD_MAPPINGS {
        if gate_open(old.config_version, mapping.min_config_version) {
            (mapping.old_to_new)(old, &mut new);
        }
    }
    new
}

/// Build a legacy record from a current-format one. Every mapping applies
/// unconditionally: old firmware ignores fields it does not understand.
pub fn new_to_old(new: &StageConfig) -> LegacyConfig {
    let mut old = LegacyConfig::new_zeroed();
    for mapping in FIELD_MAPPINGS {
        (mapping.new_to_old)(new, &mut old);
    }
    old
}

/// Parse a legacy record and migrate it to the current shape.
///
/// Old firmware truncates unused trailing fields, so short reads are
/// zero-padded on the right before parsing. Returns the migrated record
/// and the length the device actually sent, for symmetric truncation on
/// write-back.
pub fn decode_legacy(record: &[u8]) -> Result<(StageConfig, usize), StageError> {
    if record.len() < LEGACY_CONFIG_MIN_SIZE {
        return Err(StageError::InsufficientData {
            expected: LEGACY_CONFIG_MIN_SIZE,
            actual: record.len(),
        });
    }
    let mut raw = [0u8; LEGACY_CONFIG_SIZE];
    let take = record.len().min(LEGACY_CONFIG_SIZE);
    raw[..take].copy_from_slice(&record[..take]);
    let old = LegacyConfig::read_from_bytes(&raw)
        .map_err(|_| StageError::InvalidPacket("legacy configuration record".to_string()))?;
    Ok((old_to_new(&old), record.len()))
}

/// Serialize a current-format record for pre-v5 firmware.
pub fn encode_legacy(config: &StageConfig, received_len: usize) -> Vec<u8> {
    let old = new_to_old(config);
    let mut out = old.as_bytes().to_vec();
    // Firmware that sent a short record expects an equally short record
    // back; anything longer gets the full record.
    if received_len <= LEGACY_SHORT_CONFIG_LIMIT {
        out.truncate(received_len);
    }
    out
}
