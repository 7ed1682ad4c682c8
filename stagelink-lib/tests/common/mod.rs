//! Common test utilities and shared fixtures

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use stagelink_lib::api::{
    ApiCommand, HID_REPORT_INPUT, HID_REPORT_INPUT_STATE, HID_REPORT_OUTPUT, PANEL_COUNT, Panel,
};
#[allow(unused_imports)]
pub use stagelink_lib::config::{
    CONFIG_SIZE, ConfigFlags, ConfigPacket, EnabledSensors, Rgb, StageConfig,
};
#[allow(unused_imports)]
pub use stagelink_lib::error::StageError;
#[allow(unused_imports)]
pub use stagelink_lib::packet::{
    FrameAssembler, FrameFlags, MAX_PACKET_SIZE, PacketEvent, flags_only_frame, make_packets,
};
#[allow(unused_imports)]
pub use stagelink_lib::sensor_test::{SENSOR_TEST_WORDS, SensorTestData, SensorTestMode};
#[allow(unused_imports)]
pub use zerocopy::{FromZeros, IntoBytes};
#[allow(unused_imports)]
pub use zerocopy::byteorder::little_endian::U16;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// A current-format configuration with every field group populated,
/// including a recognizable padding pattern.
#[allow(dead_code)]
pub fn sample_config() -> StageConfig {
    let mut config = StageConfig::new_zeroed();
    config.master_version = 5;
    config.config_version = 5;
    config.set_flags(ConfigFlags::new().with_fsr(true));
    config.debounce_nodelay_milliseconds = U16::new(15);
    config.debounce_delay_milliseconds = U16::new(25);
    config.panel_debounce_microseconds = U16::new(4000);
    config.auto_calibration_max_deviation = 100;
    config.bad_sensor_minimum_delay_seconds = 15;
    config.auto_calibration_averages_per_update = U16::new(60);
    config.auto_calibration_samples_per_average = U16::new(500);
    config.auto_calibration_max_tare = U16::new(0xFFFF);
    config.auto_lights_timeout = (1000u16 / 128) as u8;
    config.auto_light_panel_mask = U16::new(0x01AB);
    for (i, color) in config.step_color.iter_mut().enumerate() {
        *color = Rgb::new(i as u8 * 10, 170 - i as u8 * 10, 5 + i as u8);
    }
    config.platform_strip_color = Rgb::new(0x20, 0x40, 0x80);
    for (i, settings) in config.panel_settings.iter_mut().enumerate() {
        let base = i as u8 * 16;
        settings.load_cell_low_threshold = base + 1;
        settings.load_cell_high_threshold = base + 2;
        settings.fsr_low_threshold.up = base + 3;
        settings.fsr_low_threshold.right = base + 4;
        settings.fsr_low_threshold.down = base + 5;
        settings.fsr_low_threshold.left = base + 6;
        settings.fsr_high_threshold.up = base + 7;
        settings.fsr_high_threshold.right = base + 8;
        settings.fsr_high_threshold.down = base + 9;
        settings.fsr_high_threshold.left = base + 10;
        settings.combined_low_threshold = U16::new(0x1234 + i as u16);
        settings.combined_high_threshold = U16::new(0x4321 - i as u16);
        settings.reserved = U16::new(0xBEE0 + i as u16);
    }
    config.pre_details_delay_milliseconds = 5;
    for (i, byte) in config.padding.iter_mut().enumerate() {
        *byte = 0xA0 | (i as u8 & 0x0F);
    }
    config
}

/// A device-info response payload.
#[allow(dead_code)]
pub fn device_info_payload(player: u8, serial: &[u8; 16], firmware_version: u16) -> Vec<u8> {
    let mut payload = vec![b'I', 0x00, player, 0x00];
    payload.extend_from_slice(serial);
    payload.extend_from_slice(&firmware_version.to_le_bytes());
    payload.push(b'\n');
    payload
}

/// A get-config response payload: two-byte header, record, one trailer.
#[allow(dead_code)]
pub fn config_response_payload(cmd: u8, record: &[u8]) -> Vec<u8> {
    let mut payload = vec![cmd, record.len() as u8];
    payload.extend_from_slice(record);
    payload.push(b'\n');
    payload
}

/// One de-interleaved 10-byte panel diagnostic record.
#[allow(dead_code)]
pub fn panel_record(signature: u8, sensors: [i16; 4], dips: u8) -> [u8; 10] {
    let mut record = [0u8; 10];
    record[0] = signature;
    for (i, value) in sensors.iter().enumerate() {
        record[1 + i * 2..3 + i * 2].copy_from_slice(&value.to_le_bytes());
    }
    record[9] = dips;
    record
}

/// Interleave nine panel records the way the device does: bit b of panel
/// p's byte i becomes bit p of word i*8+b.
#[allow(dead_code)]
pub fn interleave_panels(records: &[[u8; 10]; 9]) -> [u16; SENSOR_TEST_WORDS] {
    let mut words = [0u16; SENSOR_TEST_WORDS];
    for (panel, record) in records.iter().enumerate() {
        for (i, &byte) in record.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    words[i * 8 + bit] |= 1 << panel;
                }
            }
        }
    }
    words
}

/// A full sensor-test response payload for the given panel records.
#[allow(dead_code)]
pub fn sensor_test_payload(mode: SensorTestMode, records: &[[u8; 10]; 9]) -> Vec<u8> {
    let mut payload = vec![b'y', mode.into(), SENSOR_TEST_WORDS as u8];
    for word in interleave_panels(records) {
        payload.extend_from_slice(&word.to_le_bytes());
    }
    payload
}

/// Signature byte with the valid `0, 1, 0` header and the given
/// bad-sensor flags in bits 3-6.
#[allow(dead_code)]
pub fn valid_signature(bad_sensors: [bool; 4]) -> u8 {
    let mut signature = 0x02;
    for (i, &bad) in bad_sensors.iter().enumerate() {
        if bad {
            signature |= 1 << (3 + i);
        }
    }
    signature
}
