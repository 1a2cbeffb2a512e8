//! Integration tests for device selection through the audio device
//!
//! These tests drive routing the way the framework does (stream opens and
//! `routing=` parameters) and check the control writes the software mixer
//! records.

use proptest::prelude::*;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use tinyhal_core::domain::audio::{DeviceMask, Direction};
use tinyhal_core::domain::config::{load_routes, parse_routes, HalConfig};
use tinyhal_core::domain::mixer::ControlSetting;
use tinyhal_core::domain::routing::{PathRole, RouteTable, Router};
use tinyhal_infra::audio::{AudioDevice, NullPcm, SimMixer, INPUT_CONFIG};
use tinyhal_tests::{board_table, Harness, BOARD_ROUTES, HEADPHONE};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_headphone_to_speaker_enables_before_disabling() {
    init_tracing();
    let h = Harness::new();

    let mut out = h.device.open_output_stream(HEADPHONE).unwrap();
    assert_eq!(h.drain(), vec!["headphone.on", "speaker.off"]);

    out.set_parameters("routing=2").unwrap();

    assert_eq!(h.drain(), vec!["speaker.on", "headphone.off"]);
    assert_eq!(h.device.route_state().active_out, DeviceMask::OUT_SPEAKER);
}

#[test]
fn test_builtin_mic_replaces_ambient() {
    let h = Harness::new();

    let ambient = h
        .device
        .open_input_stream(DeviceMask::IN_AMBIENT, &INPUT_CONFIG)
        .unwrap();
    h.drain();
    assert_eq!(h.device.route_state().active_in, DeviceMask::IN_AMBIENT);

    let mic = h
        .device
        .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &INPUT_CONFIG)
        .unwrap();

    assert_eq!(h.drain(), vec!["builtin-mic.on", "ambient.off"]);
    assert_eq!(h.device.route_state().active_in, DeviceMask::IN_BUILTIN_MIC);

    drop(mic);
    drop(ambient);
}

#[test]
fn test_standby_twice_applies_off_once() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    h.drain();

    out.write(&[0u8; 64]).unwrap();
    assert_eq!(h.drain(), vec!["speaker.on"]);

    out.standby().unwrap();
    out.standby().unwrap();

    assert_eq!(h.drain(), vec!["speaker.off"]);
    assert_eq!(h.pcm.count_closes(), 1);
}

#[test]
fn test_new_output_stream_clears_previous_outputs() {
    let h = Harness::new();

    let both = DeviceMask::OUT_SPEAKER | DeviceMask::OUT_EARPIECE;
    let first = h.device.open_output_stream(both).unwrap();
    assert_eq!(h.device.route_state().active_out, both);
    h.drain();

    let second = h.device.open_output_stream(HEADPHONE).unwrap();

    assert_eq!(h.device.route_state().active_out, HEADPHONE);
    let writes = h.drain();
    assert_eq!(writes[0], "headphone.on");
    assert!(writes.contains(&"speaker.off".to_string()));
    assert!(writes.contains(&"earpiece.off".to_string()));

    drop(first);
    drop(second);
}

#[test]
fn test_repeated_request_is_silent() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();

    assert!(h.drain().is_empty());
    out.set_parameters("routing=2").unwrap();
    assert!(h.drain().is_empty());
}

#[test]
fn test_output_and_input_selection_independent() {
    let h = Harness::new();

    let mut out = h.device.open_output_stream(HEADPHONE).unwrap();
    let before = h.device.route_state();
    h.drain();

    let input = h
        .device
        .open_input_stream(DeviceMask::IN_WIRED_HEADSET, &INPUT_CONFIG)
        .unwrap();
    assert_eq!(h.drain(), vec!["headset.on", "builtin-mic.off"]);
    assert_eq!(h.device.route_state().active_out, before.active_out);

    out.set_parameters("routing=1").unwrap();
    assert_eq!(h.drain(), vec!["earpiece.on", "headphone.off"]);
    assert_eq!(h.device.route_state().active_in, DeviceMask::IN_WIRED_HEADSET);

    drop(input);
}

#[test]
fn test_missing_controls_do_not_stop_selection() {
    let table = parse_routes(
        r#"<mixer>
          <device name="speaker">
            <path name="on">
              <ctl name="Gone" val="1"/>
              <ctl name="SPK Left" val="1"/>
              <ctl name="Also Gone" val="Mux"/>
              <ctl name="SPK Right" val="1"/>
            </path>
          </device>
        </mixer>"#,
    )
    .unwrap();
    let mixer = SimMixer::new().with_int("SPK Left", 1).with_int("SPK Right", 1);
    let log = mixer.log();

    let device = AudioDevice::with_routes(table, Box::new(mixer), Box::new(NullPcm));

    assert_eq!(log.controls(), vec!["SPK Left", "SPK Right"]);
    assert_eq!(device.route_state().active_out, DeviceMask::OUT_SPEAKER);
}

#[test]
fn test_routing_zero_and_garbage_change_nothing() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(HEADPHONE).unwrap();
    h.drain();

    for params in ["routing=0", "routing=loud", "volume=3", ""] {
        out.set_parameters(params).unwrap();
    }

    assert!(h.drain().is_empty());
    assert_eq!(h.device.route_state().requested_out, HEADPHONE);
}

#[test]
fn test_dock_headset_opens_usb_card() {
    let h = Harness::new();
    let mut out = h
        .device
        .open_output_stream(DeviceMask::OUT_ANLG_DOCK_HEADSET)
        .unwrap();
    out.write(&[0u8; 32]).unwrap();

    let opens = h.pcm.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].card, 2);
    assert_eq!(opens[0].direction, Direction::Output);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_supported_devices_is_union_of_entries() {
    let table = board_table();
    let union = table
        .entries()
        .iter()
        .fold(DeviceMask::NONE, |acc, e| acc | e.mask);

    let device = AudioDevice::with_routes(
        table,
        Box::new(SimMixer::from_table(&board_table(), 1)),
        Box::new(NullPcm),
    );

    assert_eq!(device.supported_devices(), union);
    assert_eq!(union.bits(), 0x1 | 0x2 | 0xc | 0x800 | 0x8000_0016);
}

#[test]
fn test_defaults_applied_once_at_open() {
    let table = board_table();
    let mixer = SimMixer::from_table(&table, 1);
    let log = mixer.log();

    let _device = AudioDevice::with_routes(table, Box::new(mixer), Box::new(NullPcm));

    assert_eq!(
        log.controls(),
        vec!["Master Switch", "speaker.on", "builtin-mic.on"]
    );
}

#[test]
fn test_device_opens_from_board_property() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("herring"), BOARD_ROUTES).unwrap();

    let mut build_prop = NamedTempFile::new().unwrap();
    writeln!(build_prop, "ro.build.type=user\nro.product.board=herring").unwrap();

    let config = HalConfig {
        sound_dir: dir.path().to_path_buf(),
        build_prop: build_prop.path().to_path_buf(),
        ..HalConfig::default()
    };

    let device = AudioDevice::open(
        &config,
        |_, table| Ok(Box::new(SimMixer::from_table(table, 2))),
        Box::new(NullPcm),
    )
    .unwrap();

    assert_eq!(device.route_state().active_out, DeviceMask::OUT_SPEAKER);
}

#[test]
fn test_malformed_route_file_fails_device_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tiny_hw"), "<mixer><device name=\"speaker\">").unwrap();

    let config = HalConfig {
        sound_dir: dir.path().to_path_buf(),
        build_prop: dir.path().join("build.prop"),
        ..HalConfig::default()
    };

    let result = AudioDevice::open(
        &config,
        |_, table| Ok(Box::new(SimMixer::from_table(table, 1))),
        Box::new(NullPcm),
    );
    assert!(result.is_err());
}

#[test]
fn test_route_file_round_trip_through_disk() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(BOARD_ROUTES.as_bytes()).unwrap();

    let table = load_routes(file.path()).unwrap();
    assert_eq!(table, board_table());
    assert_eq!(
        table.entry("headphone").unwrap().sequence(PathRole::Off),
        &[ControlSetting::int("headphone.off", 1)]
    );
}

// ============================================================================
// PROPERTIES
// ============================================================================

const OUTPUT_DEVICES: [DeviceMask; 4] = [
    DeviceMask::OUT_EARPIECE,
    DeviceMask::OUT_SPEAKER,
    HEADPHONE,
    DeviceMask::OUT_ANLG_DOCK_HEADSET,
];

fn output_mask() -> impl Strategy<Value = DeviceMask> {
    (1u8..16).prop_map(|bits| {
        OUTPUT_DEVICES
            .iter()
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .fold(DeviceMask::NONE, |acc, (_, mask)| acc | *mask)
    })
}

fn router_with_log(table: RouteTable) -> (Router, tinyhal_infra::audio::MixerLog) {
    let mixer = SimMixer::from_table(&table, 1);
    let log = mixer.log();
    (Router::new(table, Box::new(mixer)), log)
}

proptest! {
    #[test]
    fn prop_routing_parameters_converge(masks in prop::collection::vec(output_mask(), 1..12)) {
        let h = Harness::new();
        let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();

        for mask in masks {
            out.set_parameters(&format!("routing={}", mask.bits())).unwrap();
            let state = h.device.route_state();
            prop_assert_eq!(state.active_out, mask);
            prop_assert_eq!(state.requested_out, mask);
        }
    }

    #[test]
    fn prop_on_sequences_precede_off_sequences(from in output_mask(), to in output_mask()) {
        let (mut router, log) = router_with_log(board_table());
        router.request(Direction::Output, from);
        log.take();

        router.request(Direction::Output, to);

        let writes = log.controls();
        let first_off = writes.iter().position(|w| w.ends_with(".off")).unwrap_or(writes.len());
        prop_assert!(writes[first_off..].iter().all(|w| w.ends_with(".off")));

        if from == to {
            prop_assert!(writes.is_empty());
        }
    }
}
