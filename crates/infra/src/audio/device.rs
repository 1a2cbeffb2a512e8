//! The audio device aggregate
//!
//! One [`AudioDevice`] owns the routing lock (and through it the route table,
//! the requested/active masks and the mixer) plus the PCM transport factory.
//! Streams keep a shared reference to the same state.

use crate::audio::pcm::PcmBackend;
use crate::audio::stream::{StreamIn, StreamOut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tinyhal_core::domain::audio::{
    check_input_parameters, input_buffer_size, AudioConfig, AudioError, DeviceMask, Direction,
    Result,
};
use tinyhal_core::domain::config::{load_routes, HalConfig, Properties};
use tinyhal_core::domain::mixer::Mixer;
use tinyhal_core::domain::routing::{ActiveRouteState, RouteTable, Router};
use tracing::{debug, info, instrument, warn};

/// Telephony mode reported by the framework
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    #[default]
    Normal,
    Ringtone,
    InCall,
    InCommunication,
}

/// State shared between the device and its streams
pub(crate) struct DeviceShared {
    pub(crate) router: Mutex<Router>,
    pub(crate) pcm: Box<dyn PcmBackend>,
    mic_mute: AtomicBool,
    mode: Mutex<AudioMode>,
    pub(crate) open_outputs: AtomicUsize,
    pub(crate) open_inputs: AtomicUsize,
}

impl DeviceShared {
    pub(crate) fn mic_mute(&self) -> bool {
        self.mic_mute.load(Ordering::Relaxed)
    }

    /// Replace the requested devices of one direction and reselect
    pub(crate) fn route(&self, direction: Direction, devices: DeviceMask) {
        let mut router = self.router.lock();
        router.request(direction, devices);
    }
}

/// Audio hardware device
pub struct AudioDevice {
    shared: Arc<DeviceShared>,
}

impl AudioDevice {
    /// Open the device from HAL settings.
    ///
    /// The route description is located through the board property and
    /// loaded before anything else; a missing or malformed file fails the
    /// open. `open_mixer` receives the configured card and the loaded table.
    #[instrument(skip_all)]
    pub fn open<F>(config: &HalConfig, open_mixer: F, pcm: Box<dyn PcmBackend>) -> Result<Self>
    where
        F: FnOnce(u32, &RouteTable) -> Result<Box<dyn Mixer>>,
    {
        let properties = Properties::load(&config.build_prop)?;
        let path = config.route_file(&properties);
        info!(path = %path.display(), "Opening audio device");

        let table = load_routes(&path)?;
        let mixer = open_mixer(config.mixer_card, &table).map_err(|e| {
            warn!(card = config.mixer_card, error = %e, "Unable to open the mixer, aborting");
            e
        })?;

        Ok(Self::with_routes(table, mixer, pcm))
    }

    /// Build a device around an already loaded route table.
    ///
    /// Applies the default sequence, then routes to the speaker and the
    /// builtin microphone.
    pub fn with_routes(table: RouteTable, mixer: Box<dyn Mixer>, pcm: Box<dyn PcmBackend>) -> Self {
        let mut router = Router::new(table, mixer);

        router.request(Direction::Output, DeviceMask::OUT_SPEAKER);
        router.request(Direction::Input, DeviceMask::IN_BUILTIN_MIC);

        info!(
            supported = %router.supported_devices(),
            devices = router.table().len(),
            "Audio device ready"
        );

        Self {
            shared: Arc::new(DeviceShared {
                router: Mutex::new(router),
                pcm,
                mic_mute: AtomicBool::new(false),
                mode: Mutex::new(AudioMode::Normal),
                open_outputs: AtomicUsize::new(0),
                open_inputs: AtomicUsize::new(0),
            }),
        }
    }

    pub fn init_check(&self) -> Result<()> {
        Ok(())
    }

    /// Union of every device the route table knows
    pub fn supported_devices(&self) -> DeviceMask {
        self.shared.router.lock().supported_devices()
    }

    pub fn set_voice_volume(&self, volume: f32) -> Result<()> {
        debug!("Ignoring voice volume {}", volume);
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        debug!("Ignoring master volume {}", volume);
        Ok(())
    }

    pub fn set_mode(&self, mode: AudioMode) -> Result<()> {
        info!(?mode, "Setting audio mode");
        *self.shared.mode.lock() = mode;
        Ok(())
    }

    pub fn mode(&self) -> AudioMode {
        *self.shared.mode.lock()
    }

    pub fn set_mic_mute(&self, state: bool) -> Result<()> {
        info!(mute = state, "Setting microphone mute");
        self.shared.mic_mute.store(state, Ordering::Relaxed);
        Ok(())
    }

    pub fn mic_mute(&self) -> bool {
        self.shared.mic_mute()
    }

    /// Device-wide parameters are not supported
    pub fn set_parameters(&self, kvpairs: &str) -> Result<()> {
        debug!("Rejecting device parameters '{}'", kvpairs);
        Err(AudioError::Unsupported("device parameters".to_string()))
    }

    pub fn get_parameters(&self, _keys: &str) -> String {
        String::new()
    }

    /// Capture buffer size in bytes for a prospective input stream
    pub fn input_buffer_size(&self, config: &AudioConfig) -> Result<usize> {
        input_buffer_size(config.sample_rate, config.format, config.channels)
    }

    /// Open a playback stream routed to `devices`.
    ///
    /// Any previously requested output is dropped; the stream itself starts
    /// in standby with the fixed playback configuration.
    pub fn open_output_stream(&self, devices: DeviceMask) -> Result<StreamOut> {
        info!(devices = %devices, "Opening output stream");

        self.shared.route(Direction::Output, devices);
        self.shared.open_outputs.fetch_add(1, Ordering::Relaxed);

        Ok(StreamOut::new(Arc::clone(&self.shared)))
    }

    pub fn close_output_stream(&self, stream: StreamOut) -> Result<()> {
        stream.close()
    }

    /// Open a capture stream routed to `devices`.
    ///
    /// The requested configuration is validated; only its channel count is
    /// carried through to the transport.
    pub fn open_input_stream(&self, devices: DeviceMask, config: &AudioConfig) -> Result<StreamIn> {
        info!(devices = %devices, rate = config.sample_rate, channels = config.channels, "Opening input stream");

        check_input_parameters(config.sample_rate, config.format, config.channels)?;

        self.shared.route(Direction::Input, devices);
        self.shared.open_inputs.fetch_add(1, Ordering::Relaxed);

        Ok(StreamIn::new(Arc::clone(&self.shared), config.channels))
    }

    pub fn close_input_stream(&self, stream: StreamIn) -> Result<()> {
        stream.close()
    }

    /// Current requested and active masks
    pub fn route_state(&self) -> ActiveRouteState {
        self.shared.router.lock().state()
    }

    /// Snapshot of the routing state for diagnostics
    pub fn dump(&self) -> DeviceSnapshot {
        let router = self.shared.router.lock();
        let state = router.state();

        let routes = router
            .table()
            .entries()
            .iter()
            .map(|entry| {
                let direction = entry.direction();
                RouteSnapshot {
                    name: entry.name.clone(),
                    mask: entry.mask,
                    requested: state.requested(direction).intersects(entry.mask),
                    active: state.active(direction).intersects(entry.mask),
                }
            })
            .collect();

        DeviceSnapshot {
            supported: router.supported_devices(),
            state,
            routes,
            mode: self.mode(),
            mic_mute: self.mic_mute(),
            open_outputs: self.shared.open_outputs.load(Ordering::Relaxed),
            open_inputs: self.shared.open_inputs.load(Ordering::Relaxed),
        }
    }

    /// Tear the device down
    pub fn close(self) {
        let outputs = self.shared.open_outputs.load(Ordering::Relaxed);
        let inputs = self.shared.open_inputs.load(Ordering::Relaxed);
        if outputs + inputs > 0 {
            warn!(outputs, inputs, "Closing audio device with streams still open");
        }
        info!("Audio device closed");
    }
}

impl fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevice")
            .field("state", &self.route_state())
            .finish_non_exhaustive()
    }
}

/// One route table entry in a [`DeviceSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub name: String,
    pub mask: DeviceMask,
    pub requested: bool,
    pub active: bool,
}

/// Routing state as reported by [`AudioDevice::dump`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub supported: DeviceMask,
    pub state: ActiveRouteState,
    pub routes: Vec<RouteSnapshot>,
    pub mode: AudioMode,
    pub mic_mute: bool,
    pub open_outputs: usize,
    pub open_inputs: usize,
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Supported devices: {}", self.supported)?;
        writeln!(
            f,
            "Output: requested {} active {}",
            self.state.requested_out, self.state.active_out
        )?;
        writeln!(
            f,
            "Input: requested {} active {}",
            self.state.requested_in, self.state.active_in
        )?;
        writeln!(
            f,
            "Mode: {:?}, mic mute: {}, streams: {} out / {} in",
            self.mode, self.mic_mute, self.open_outputs, self.open_inputs
        )?;
        for route in &self.routes {
            writeln!(
                f,
                "  {:<14} {:>10}  {}",
                route.name,
                route.mask.to_string(),
                if route.active { "on" } else { "off" }
            )?;
        }
        Ok(())
    }
}
