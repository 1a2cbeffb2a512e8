//! Playback and capture streams
//!
//! A stream starts in standby without a transport. The first write or read
//! re-applies the on-sequences of the requested devices and opens a PCM
//! transport with the fixed profile for its role; standby closes the
//! transport and applies the off-sequences again.

use crate::audio::device::DeviceShared;
use crate::audio::params::StrParms;
use crate::audio::pcm::{PcmHandle, PcmRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tinyhal_core::domain::audio::{
    card, port, AudioConfig, AudioError, AudioFormat, DeviceMask, Direction, PcmProfile, Result,
    MM_LOW_POWER_SAMPLING_RATE,
};
use tinyhal_core::domain::routing::PathRole;
use tracing::{debug, error, info, warn};

/// Fixed configuration reported by playback streams
pub const OUTPUT_CONFIG: AudioConfig = AudioConfig {
    sample_rate: MM_LOW_POWER_SAMPLING_RATE,
    channels: 2,
    format: AudioFormat::Pcm16Bit,
};
pub const OUTPUT_BUFFER_SIZE: usize = 4096;

/// Fixed configuration reported by capture streams
pub const INPUT_CONFIG: AudioConfig = AudioConfig {
    sample_rate: 8000,
    channels: 1,
    format: AudioFormat::Pcm16Bit,
};
pub const INPUT_BUFFER_SIZE: usize = 320;

/// Opaque effect attached to a stream; never applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectHandle(pub u64);

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Standby,
    Active,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Standby => write!(f, "standby"),
            StreamState::Active => write!(f, "active"),
        }
    }
}

/// Dock headsets are wired to the USB card
fn output_card(requested: DeviceMask) -> u32 {
    if requested.intersects(DeviceMask::OUT_ANLG_DOCK_HEADSET | DeviceMask::OUT_DGTL_DOCK_HEADSET) {
        card::USB
    } else {
        card::DEFAULT
    }
}

fn attach_effect(effects: &mut Vec<EffectHandle>, effect: EffectHandle) {
    if !effects.contains(&effect) {
        debug!("Attaching effect {:?}", effect);
        effects.push(effect);
    }
}

fn detach_effect(effects: &mut Vec<EffectHandle>, effect: EffectHandle) {
    effects.retain(|e| *e != effect);
}

// ============================================================================
// PLAYBACK
// ============================================================================

/// Playback stream
///
/// Calls on one stream are serialised by the caller, so the transport needs
/// no lock of its own.
pub struct StreamOut {
    device: Arc<DeviceShared>,
    pcm: Option<Box<dyn PcmHandle>>,
    effects: Vec<EffectHandle>,
}

impl StreamOut {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Self {
        Self {
            device,
            pcm: None,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        if self.pcm.is_some() {
            StreamState::Active
        } else {
            StreamState::Standby
        }
    }

    pub fn config(&self) -> AudioConfig {
        OUTPUT_CONFIG
    }

    pub fn sample_rate(&self) -> u32 {
        OUTPUT_CONFIG.sample_rate
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        if rate == OUTPUT_CONFIG.sample_rate {
            Ok(())
        } else {
            Err(AudioError::InvalidArgument(format!(
                "playback rate {} is fixed at {}",
                rate, OUTPUT_CONFIG.sample_rate
            )))
        }
    }

    pub fn buffer_size(&self) -> usize {
        OUTPUT_BUFFER_SIZE
    }

    pub fn channels(&self) -> u16 {
        OUTPUT_CONFIG.channels
    }

    pub fn format(&self) -> AudioFormat {
        OUTPUT_CONFIG.format
    }

    pub fn set_format(&mut self, format: AudioFormat) -> Result<()> {
        debug!("Ignoring playback format {:?}", format);
        Ok(())
    }

    pub fn latency(&self) -> u32 {
        0
    }

    pub fn set_volume(&mut self, left: f32, right: f32) -> Result<()> {
        debug!("Ignoring stream volume {}/{}", left, right);
        Ok(())
    }

    pub fn render_position(&self) -> Result<u32> {
        Err(AudioError::InvalidArgument("render position".to_string()))
    }

    /// Apply a parameter string; only `routing` is acted on
    pub fn set_parameters(&mut self, kvpairs: &str) -> Result<()> {
        let parms = StrParms::parse(kvpairs);

        if let Some(devices) = parms.routing() {
            info!(devices = %devices, "Changing output routing");
            self.device.route(Direction::Output, devices);
        }

        Ok(())
    }

    pub fn get_parameters(&self, _keys: &str) -> String {
        String::new()
    }

    pub fn add_audio_effect(&mut self, effect: EffectHandle) -> Result<()> {
        attach_effect(&mut self.effects, effect);
        Ok(())
    }

    pub fn remove_audio_effect(&mut self, effect: EffectHandle) -> Result<()> {
        detach_effect(&mut self.effects, effect);
        Ok(())
    }

    pub fn effects(&self) -> &[EffectHandle] {
        &self.effects
    }

    /// Route the requested outputs and open the playback transport
    fn start(&mut self) -> Result<()> {
        let request = {
            let mut router = self.device.router.lock();
            router.apply_requested(Direction::Output, PathRole::On);

            PcmRequest {
                card: output_card(router.state().requested_out),
                port: port::MM_LOW_POWER,
                direction: Direction::Output,
                mmap: true,
                config: PcmProfile::LowPowerPlayback.config(),
            }
        };

        match self.device.pcm.open(&request) {
            Ok(pcm) => {
                info!("Output stream active on {}", request);
                self.pcm = Some(pcm);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open playback transport on {}: {}", request, e);
                Err(AudioError::Busy(e.to_string()))
            }
        }
    }

    /// Write interleaved PCM, leaving standby first if needed
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        if self.pcm.is_none() {
            self.start()?;
        }

        let Some(pcm) = self.pcm.as_mut() else {
            return Err(AudioError::Busy("playback transport missing".to_string()));
        };

        pcm.write(buffer)?;
        Ok(buffer.len())
    }

    /// Close the transport and disable the requested outputs
    pub fn standby(&mut self) -> Result<()> {
        let Some(pcm) = self.pcm.take() else {
            return Ok(());
        };

        let result = pcm.close();
        self.device
            .router
            .lock()
            .apply_requested(Direction::Output, PathRole::Off);
        info!("Output stream in standby");

        result
    }

    /// Enter standby and release the stream
    pub fn close(mut self) -> Result<()> {
        self.standby()
    }
}

impl Drop for StreamOut {
    fn drop(&mut self) {
        if let Err(e) = self.standby() {
            warn!("Error closing playback transport: {}", e);
        }
        self.device.open_outputs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for StreamOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOut")
            .field("state", &self.state())
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CAPTURE
// ============================================================================

struct InputState {
    pcm: Option<Box<dyn PcmHandle>>,
    effects: Vec<EffectHandle>,
}

/// Capture stream
///
/// The transport sits behind a per-stream lock, taken before the routing
/// lock, so separate capture streams never wait on each other's data path.
pub struct StreamIn {
    device: Arc<DeviceShared>,
    channels: u16,
    inner: Mutex<InputState>,
}

impl StreamIn {
    pub(crate) fn new(device: Arc<DeviceShared>, channels: u16) -> Self {
        Self {
            device,
            channels,
            inner: Mutex::new(InputState {
                pcm: None,
                effects: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        if self.inner.lock().pcm.is_some() {
            StreamState::Active
        } else {
            StreamState::Standby
        }
    }

    pub fn config(&self) -> AudioConfig {
        INPUT_CONFIG
    }

    pub fn sample_rate(&self) -> u32 {
        INPUT_CONFIG.sample_rate
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        debug!("Ignoring capture rate {}", rate);
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        INPUT_BUFFER_SIZE
    }

    pub fn channels(&self) -> u16 {
        INPUT_CONFIG.channels
    }

    pub fn format(&self) -> AudioFormat {
        INPUT_CONFIG.format
    }

    pub fn set_format(&self, format: AudioFormat) -> Result<()> {
        debug!("Ignoring capture format {:?}", format);
        Ok(())
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        debug!("Ignoring capture gain {}", gain);
        Ok(())
    }

    pub fn set_parameters(&self, kvpairs: &str) -> Result<()> {
        debug!("Ignoring capture parameters '{}'", kvpairs);
        Ok(())
    }

    pub fn get_parameters(&self, _keys: &str) -> String {
        String::new()
    }

    pub fn input_frames_lost(&self) -> u32 {
        0
    }

    pub fn add_audio_effect(&self, effect: EffectHandle) -> Result<()> {
        attach_effect(&mut self.inner.lock().effects, effect);
        Ok(())
    }

    pub fn remove_audio_effect(&self, effect: EffectHandle) -> Result<()> {
        detach_effect(&mut self.inner.lock().effects, effect);
        Ok(())
    }

    pub fn effects(&self) -> Vec<EffectHandle> {
        self.inner.lock().effects.clone()
    }

    /// Route the requested inputs and open the capture transport
    fn start(&self, state: &mut InputState) -> Result<()> {
        let mut config = PcmProfile::Capture.config();
        config.channels = self.channels;

        let request = PcmRequest {
            card: card::DEFAULT,
            port: port::MIC_CAPTURE,
            direction: Direction::Input,
            mmap: true,
            config,
        };

        self.device
            .router
            .lock()
            .apply_requested(Direction::Input, PathRole::On);

        match self.device.pcm.open(&request) {
            Ok(pcm) => {
                info!("Input stream active on {}", request);
                state.pcm = Some(pcm);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open capture transport on {}: {}", request, e);
                Err(AudioError::OutOfMemory(e.to_string()))
            }
        }
    }

    /// Fill `buffer` with captured PCM, leaving standby first if needed.
    ///
    /// A muted microphone yields silence.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.inner.lock();

        if state.pcm.is_none() {
            self.start(&mut state)?;
        }

        let Some(pcm) = state.pcm.as_mut() else {
            return Err(AudioError::OutOfMemory("capture transport missing".to_string()));
        };

        pcm.read(buffer)?;

        if self.device.mic_mute() {
            buffer.fill(0);
        }

        Ok(buffer.len())
    }

    /// Close the transport and disable the requested inputs
    pub fn standby(&self) -> Result<()> {
        let mut state = self.inner.lock();

        let Some(pcm) = state.pcm.take() else {
            return Ok(());
        };

        let result = pcm.close();
        self.device
            .router
            .lock()
            .apply_requested(Direction::Input, PathRole::Off);
        info!("Input stream in standby");

        result
    }

    /// Enter standby and release the stream
    pub fn close(self) -> Result<()> {
        self.standby()
    }
}

impl Drop for StreamIn {
    fn drop(&mut self) {
        if let Err(e) = self.standby() {
            warn!("Error closing capture transport: {}", e);
        }
        self.device.open_inputs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for StreamIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIn")
            .field("state", &self.state())
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
