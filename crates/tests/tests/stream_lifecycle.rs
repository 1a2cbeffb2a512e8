//! Integration tests for stream standby/active transitions and locking

use std::sync::Arc;
use std::thread;
use tinyhal_core::domain::audio::{AudioConfig, AudioFormat, DeviceMask};
use tinyhal_infra::audio::{EffectHandle, StreamState, INPUT_CONFIG};
use tinyhal_tests::{Harness, PcmEvent, HEADPHONE};

// ============================================================================
// PLAYBACK
// ============================================================================

#[test]
fn test_routes_applied_before_transport_opens() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(HEADPHONE).unwrap();
    h.drain();

    out.write(&[1u8; 128]).unwrap();

    assert_eq!(h.drain(), vec!["headphone.on"]);
    let events = h.pcm.events();
    assert!(matches!(events[0], PcmEvent::Open(_)));
    assert_eq!(events[1], PcmEvent::Write(128));
}

#[test]
fn test_open_failure_leaves_stream_in_standby() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    h.drain();
    h.pcm.fail_open(true);

    let err = out.write(&[0u8; 32]).unwrap_err();
    assert_eq!(err.status(), -16);
    assert_eq!(out.state(), StreamState::Standby);
    // The mixer is left alone on failure
    assert_eq!(h.drain(), vec!["speaker.on"]);

    // The next write retries the whole start sequence
    h.pcm.fail_open(false);
    out.write(&[0u8; 32]).unwrap();
    assert_eq!(out.state(), StreamState::Active);
    assert_eq!(h.drain(), vec!["speaker.on"]);
}

#[test]
fn test_failed_open_does_not_disable_shared_output() {
    let h = Harness::new();
    let mut playing = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    playing.write(&[0u8; 32]).unwrap();
    assert_eq!(playing.state(), StreamState::Active);

    let mut late = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    h.drain();
    h.pcm.fail_open(true);

    assert_eq!(late.write(&[0u8; 32]).unwrap_err().status(), -16);

    assert!(!h.drain().contains(&"speaker.off".to_string()));
    assert_eq!(playing.state(), StreamState::Active);
    assert_eq!(late.state(), StreamState::Standby);
    assert_eq!(h.device.route_state().active_out.bits(), 0x2);

    // The stream that did open keeps playing
    h.pcm.fail_open(false);
    playing.write(&[0u8; 32]).unwrap();
}

#[test]
fn test_transport_write_error_is_surfaced() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    out.write(&[0u8; 32]).unwrap();

    h.pcm.fail_io(true);
    let err = out.write(&[0u8; 32]).unwrap_err();

    assert_eq!(err.status(), -5);
    // No automatic standby or retry
    assert_eq!(out.state(), StreamState::Active);
    assert_eq!(h.pcm.opens().len(), 1);
}

#[test]
fn test_route_change_while_active_keeps_transport() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    out.write(&[0u8; 32]).unwrap();
    h.drain();

    out.set_parameters("routing=12").unwrap();
    out.write(&[0u8; 32]).unwrap();

    assert_eq!(h.drain(), vec!["headphone.on", "speaker.off"]);
    assert_eq!(h.pcm.opens().len(), 1);

    // Standby now disables the new route
    out.standby().unwrap();
    assert_eq!(h.drain(), vec!["headphone.off"]);
}

#[test]
fn test_close_output_stream_enters_standby() {
    let h = Harness::new();
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();
    out.write(&[0u8; 32]).unwrap();
    h.drain();

    h.device.close_output_stream(out).unwrap();

    assert_eq!(h.drain(), vec!["speaker.off"]);
    assert_eq!(h.pcm.count_closes(), 1);
    assert_eq!(h.device.dump().open_outputs, 0);
}

// ============================================================================
// CAPTURE
// ============================================================================

#[test]
fn test_capture_cycle() {
    let h = Harness::new();
    let config = AudioConfig {
        sample_rate: 48000,
        channels: 2,
        format: AudioFormat::Pcm16Bit,
    };
    let input = h
        .device
        .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &config)
        .unwrap();
    h.drain();

    let mut buf = vec![0u8; 320];
    assert_eq!(input.read(&mut buf).unwrap(), 320);
    assert!(buf.iter().all(|&b| b == 0x5a));
    assert_eq!(h.drain(), vec!["builtin-mic.on"]);

    let request = h.pcm.opens()[0];
    assert_eq!(request.port, 3);
    assert_eq!(request.config.channels, 2);
    assert_eq!(request.config.period_count, 2);

    input.standby().unwrap();
    input.standby().unwrap();
    assert_eq!(h.drain(), vec!["builtin-mic.off"]);
}

#[test]
fn test_muted_capture_is_silent() {
    let h = Harness::new();
    let input = h
        .device
        .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &INPUT_CONFIG)
        .unwrap();

    h.device.set_mic_mute(true).unwrap();
    let mut buf = vec![0xffu8; 64];
    input.read(&mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));

    h.device.set_mic_mute(false).unwrap();
    input.read(&mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x5a));
}

#[test]
fn test_capture_open_failure_is_out_of_memory() {
    let h = Harness::new();
    let input = h
        .device
        .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &INPUT_CONFIG)
        .unwrap();
    h.drain();
    h.pcm.fail_open(true);

    let err = input.read(&mut [0u8; 16]).unwrap_err();

    assert_eq!(err.status(), -12);
    assert_eq!(input.state(), StreamState::Standby);
    assert_eq!(h.drain(), vec!["builtin-mic.on"]);
    assert_eq!(h.device.route_state().active_in, DeviceMask::IN_BUILTIN_MIC);
}

#[test]
fn test_invalid_capture_request_rejected_before_routing() {
    let h = Harness::new();
    for config in [
        AudioConfig { sample_rate: 96000, channels: 1, format: AudioFormat::Pcm16Bit },
        AudioConfig { sample_rate: 8000, channels: 3, format: AudioFormat::Pcm16Bit },
        AudioConfig { sample_rate: 8000, channels: 1, format: AudioFormat::Pcm8Bit },
    ] {
        let err = h
            .device
            .open_input_stream(DeviceMask::IN_AMBIENT, &config)
            .unwrap_err();
        assert_eq!(err.status(), -22);
    }

    assert!(h.drain().is_empty());
    assert_eq!(h.device.route_state().active_in, DeviceMask::IN_BUILTIN_MIC);
}

#[test]
fn test_effects_accepted_on_capture() {
    let h = Harness::new();
    let input = h
        .device
        .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &INPUT_CONFIG)
        .unwrap();

    input.add_audio_effect(EffectHandle(1)).unwrap();
    input.add_audio_effect(EffectHandle(2)).unwrap();
    input.remove_audio_effect(EffectHandle(1)).unwrap();
    input.remove_audio_effect(EffectHandle(9)).unwrap();

    assert_eq!(input.effects(), vec![EffectHandle(2)]);
    assert!(h.drain().is_empty());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_capture_streams() {
    let h = Harness::new();
    let streams: Vec<_> = (0..4)
        .map(|_| {
            Arc::new(
                h.device
                    .open_input_stream(DeviceMask::IN_BUILTIN_MIC, &INPUT_CONFIG)
                    .unwrap(),
            )
        })
        .collect();

    let workers: Vec<_> = streams
        .iter()
        .map(|stream| {
            let stream = Arc::clone(stream);
            thread::spawn(move || {
                let mut buf = vec![0u8; 320];
                for i in 0..50 {
                    stream.read(&mut buf).unwrap();
                    if i % 10 == 9 {
                        stream.standby().unwrap();
                    }
                }
                stream.standby().unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let events = h.pcm.events();
    let opens = events.iter().filter(|e| matches!(e, PcmEvent::Open(_))).count();
    assert_eq!(opens, h.pcm.count_closes());
    assert_eq!(opens, 4 * 5);
    assert!(streams.iter().all(|s| s.state() == StreamState::Standby));
}

#[test]
fn test_route_changes_race_with_playback() {
    let h = Arc::new(Harness::new());
    let mut out = h.device.open_output_stream(DeviceMask::OUT_SPEAKER).unwrap();

    let router_side = {
        let h = Arc::clone(&h);
        thread::spawn(move || {
            let config = INPUT_CONFIG;
            for i in 0..100 {
                let mask = if i % 2 == 0 {
                    DeviceMask::IN_WIRED_HEADSET
                } else {
                    DeviceMask::IN_BUILTIN_MIC
                };
                let stream = h.device.open_input_stream(mask, &config).unwrap();
                drop(stream);
            }
        })
    };

    for i in 0..100 {
        out.write(&[0u8; 64]).unwrap();
        if i % 3 == 0 {
            out.set_parameters(if i % 2 == 0 { "routing=12" } else { "routing=2" })
                .unwrap();
        }
    }
    router_side.join().unwrap();
    out.set_parameters("routing=1").unwrap();

    let state = h.device.route_state();
    assert_eq!(state.active_out, state.requested_out);
    assert_eq!(state.active_out, DeviceMask::OUT_EARPIECE);
    assert_eq!(state.active_in, DeviceMask::IN_BUILTIN_MIC);
}
