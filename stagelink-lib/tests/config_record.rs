//! Tests for the configuration record codec

mod common;

use common::*;
use stagelink_lib::legacy::{self, LEGACY_CONFIG_SIZE, LegacyConfig};

#[test]
fn v5_record_round_trips_exactly() {
    let config = sample_config();
    let encoded = config.encode();
    assert_eq!(encoded.len(), CONFIG_SIZE);

    let decoded = StageConfig::decode(&encoded).expect("decode");
    assert_eq!(decoded, config);
    // The reserved padding tail survives untouched.
    assert_eq!(decoded.padding, config.padding);
}

#[test]
fn record_size_is_an_abi_contract() {
    assert_eq!(CONFIG_SIZE, 250);
    assert_eq!(sample_config().encode().len(), 250);
    assert!(StageConfig::decode(&[0u8; 249]).is_err());
    assert!(StageConfig::decode(&[0u8; 251]).is_err());
}

#[test]
fn enabled_sensors_pack_panel_zero_into_the_low_nibble() {
    let mut config = StageConfig::new_zeroed();
    let mut panels = [EnabledSensors::default(); PANEL_COUNT];
    panels[0] = EnabledSensors::all();
    config.set_enabled_sensors(panels);

    assert_eq!(config.enabled_sensors, [0x0F, 0x00, 0x00, 0x00, 0x00]);
    // Unpacking reproduces the original, including the trailing padding
    // nibble being ignored.
    config.enabled_sensors[4] |= 0xF0;
    assert_eq!(config.enabled_sensors(), panels);
}

#[test]
fn enabled_sensors_nibble_layout() {
    let mut config = StageConfig::new_zeroed();

    let mut panels = [EnabledSensors::default(); PANEL_COUNT];
    panels[1] = EnabledSensors::all();
    config.set_enabled_sensors(panels);
    assert_eq!(config.enabled_sensors, [0xF0, 0x00, 0x00, 0x00, 0x00]);

    let mut panels = [EnabledSensors::default(); PANEL_COUNT];
    panels[8] = EnabledSensors::all();
    config.set_enabled_sensors(panels);
    assert_eq!(config.enabled_sensors, [0x00, 0x00, 0x00, 0x00, 0x0F]);
}

#[test]
fn enabled_sensors_bit_order_within_a_nibble() {
    let mut config = StageConfig::new_zeroed();
    let mut panels = [EnabledSensors::default(); PANEL_COUNT];
    panels[0].up = true;
    config.set_enabled_sensors(panels);
    assert_eq!(config.enabled_sensors[0], 0x08);

    panels[0] = EnabledSensors {
        left: true,
        ..Default::default()
    };
    config.set_enabled_sensors(panels);
    assert_eq!(config.enabled_sensors[0], 0x01);
}

#[test]
fn flags_byte_accessors() {
    let mut config = StageConfig::new_zeroed();
    assert!(!config.is_fsr());

    config.flags = 0x02;
    assert!(config.is_fsr());
    assert!(!config.flags().auto_lighting_use_pressed_animations());

    config.set_flags(
        ConfigFlags::new()
            .with_fsr(true)
            .with_auto_lighting_use_pressed_animations(true),
    );
    assert_eq!(config.flags, 0x03);
}

#[test]
fn config_packet_round_trips_for_v5_firmware() {
    let record = sample_config().encode();
    let packet = ConfigPacket::decode(&record, 5).expect("decode");
    assert_eq!(packet.encode(5), record.to_vec());
}

#[test]
fn config_packet_migrates_legacy_records() {
    let mut old = LegacyConfig::new_zeroed();
    old.config_version = 3;
    old.up_threshold_low = 33;
    old.up_threshold_high = 50;
    old.enabled_sensors = [0x0F, 0, 0, 0, 0];

    let packet = ConfigPacket::decode(old.as_bytes(), 4).expect("decode");
    // The "up" group lands on the Up panel's load-cell thresholds.
    let up = &packet.config.panel_settings[Panel::Up as usize];
    assert_eq!(up.load_cell_low_threshold, 33);
    assert_eq!(up.load_cell_high_threshold, 50);
    assert_eq!(packet.config.enabled_sensors, old.enabled_sensors);

    // A full-length read is written back at full length.
    assert_eq!(packet.encode(4).len(), LEGACY_CONFIG_SIZE);
}

#[test]
fn short_legacy_reads_write_back_short() {
    let mut old = LegacyConfig::new_zeroed();
    old.config_version = 0xFF;
    old.center_threshold_low = 20;
    old.center_threshold_high = 30;

    let short = &old.as_bytes()[..84];
    let packet = ConfigPacket::decode(short, 3).expect("decode");
    let written = packet.encode(3);
    assert_eq!(written.len(), 84);
    assert_eq!(written[12], 20);
    assert_eq!(written[13], 30);
}

#[test]
fn legacy_migration_is_idempotent_for_shared_fields() {
    let mut old = LegacyConfig::new_zeroed();
    old.config_version = 0x05;
    old.master_version = 4;
    old.up_threshold_low = 1;
    old.up_threshold_high = 2;
    old.cardinal_threshold_low = 3;
    old.cardinal_threshold_high = 4;
    old.center_threshold_low = 5;
    old.center_threshold_high = 6;
    old.corner_threshold_low = 7;
    old.corner_threshold_high = 8;
    old.up_left_threshold_low = 9;
    old.up_left_threshold_high = 10;
    old.left_threshold_low = 11;
    old.left_threshold_high = 12;
    old.right_threshold_low = 13;
    old.right_threshold_high = 14;
    old.down_left_threshold_low = 15;
    old.down_left_threshold_high = 16;
    old.down_right_threshold_low = 17;
    old.down_right_threshold_high = 18;
    old.debounce_delay_milliseconds = U16::new(40);
    old.panel_debounce_microseconds = U16::new(4000);
    old.auto_light_panel_mask = U16::new(0x1FF);
    old.enabled_sensors = [0x12, 0x34, 0x56, 0x78, 0x90];
    old.auto_lights_timeout = 7;
    old.panel_rotation = 1;

    let round_tripped = legacy::new_to_old(&legacy::old_to_new(&old));

    // Fields without a new-format counterpart are excluded from the
    // property; compare the rest by building both sides from the same
    // zeroed template.
    let mut reference = old;
    reference.unused1 = [0; 6];
    reference.master_debounce_milliseconds = U16::new(0);
    reference.auto_calibration_period_milliseconds = U16::new(0);
    reference.unused7 = U16::new(0);
    reference.unused8 = 0;
    reference.unused9 = [0; 2];
    assert_eq!(round_tripped, reference);
}
