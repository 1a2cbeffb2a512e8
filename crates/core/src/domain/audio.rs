//! Audio device identifiers, stream formats and transport presets
//!
//! This module defines the platform-agnostic vocabulary shared by the routing
//! engine and the stream lifecycle: device bitmasks, fixed PCM transport
//! profiles and the error taxonomy surfaced across the plugin boundary.

use crate::domain::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Caller supplied a value outside the accepted set
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Playback transport could not be readied
    #[error("Transport busy: {0}")]
    Busy(String),

    /// Capture transport could not be readied
    #[error("Out of resources: {0}")]
    OutOfMemory(String),

    /// Transport failed while moving frames
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single mixer control write failed
    #[error("Control '{control}': {reason}")]
    Control { control: String, reason: String },

    /// Operation not implemented by this device
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Hardware (mixer card) could not be opened
    #[error("No such device: {0}")]
    NoDevice(String),

    /// Route configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AudioError {
    /// Negative errno value returned to the audio framework.
    pub fn status(&self) -> i32 {
        const EIO: i32 = 5;
        const ENOMEM: i32 = 12;
        const EBUSY: i32 = 16;
        const ENODEV: i32 = 19;
        const EINVAL: i32 = 22;
        const ENOSYS: i32 = 38;

        -match self {
            AudioError::InvalidArgument(_) | AudioError::Control { .. } => EINVAL,
            AudioError::Busy(_) => EBUSY,
            AudioError::OutOfMemory(_) => ENOMEM,
            AudioError::Transport(_) => EIO,
            AudioError::Unsupported(_) => ENOSYS,
            AudioError::NoDevice(_) | AudioError::Config(_) => ENODEV,
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Bitmask of physical audio devices
///
/// Output devices occupy the low bits; input devices carry [`DeviceMask::BIT_IN`]
/// so the two spaces never overlap numerically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceMask(u32);

impl DeviceMask {
    pub const NONE: DeviceMask = DeviceMask(0);
    pub const BIT_IN: DeviceMask = DeviceMask(0x8000_0000);

    pub const OUT_EARPIECE: DeviceMask = DeviceMask(0x1);
    pub const OUT_SPEAKER: DeviceMask = DeviceMask(0x2);
    pub const OUT_WIRED_HEADSET: DeviceMask = DeviceMask(0x4);
    pub const OUT_WIRED_HEADPHONE: DeviceMask = DeviceMask(0x8);
    pub const OUT_BLUETOOTH_SCO: DeviceMask = DeviceMask(0x10);
    pub const OUT_BLUETOOTH_SCO_HEADSET: DeviceMask = DeviceMask(0x20);
    pub const OUT_BLUETOOTH_SCO_CARKIT: DeviceMask = DeviceMask(0x40);
    pub const OUT_BLUETOOTH_A2DP: DeviceMask = DeviceMask(0x80);
    pub const OUT_BLUETOOTH_A2DP_HEADPHONES: DeviceMask = DeviceMask(0x100);
    pub const OUT_BLUETOOTH_A2DP_SPEAKER: DeviceMask = DeviceMask(0x200);
    pub const OUT_AUX_DIGITAL: DeviceMask = DeviceMask(0x400);
    pub const OUT_ANLG_DOCK_HEADSET: DeviceMask = DeviceMask(0x800);
    pub const OUT_DGTL_DOCK_HEADSET: DeviceMask = DeviceMask(0x1000);
    pub const OUT_ALL: DeviceMask = DeviceMask(0x1fff);

    pub const IN_COMMUNICATION: DeviceMask = DeviceMask(0x8000_0001);
    pub const IN_AMBIENT: DeviceMask = DeviceMask(0x8000_0002);
    pub const IN_BUILTIN_MIC: DeviceMask = DeviceMask(0x8000_0004);
    pub const IN_BLUETOOTH_SCO_HEADSET: DeviceMask = DeviceMask(0x8000_0008);
    pub const IN_WIRED_HEADSET: DeviceMask = DeviceMask(0x8000_0010);
    pub const IN_AUX_DIGITAL: DeviceMask = DeviceMask(0x8000_0020);
    pub const IN_VOICE_CALL: DeviceMask = DeviceMask(0x8000_0040);
    pub const IN_BACK_MIC: DeviceMask = DeviceMask(0x8000_0080);
    pub const IN_ALL: DeviceMask = DeviceMask(0x8000_00ff);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the mask lives in the input device space
    pub const fn is_input(self) -> bool {
        self.0 & Self::BIT_IN.0 != 0
    }

    pub fn direction(self) -> Direction {
        if self.is_input() {
            Direction::Input
        } else {
            Direction::Output
        }
    }

    /// Device bits with the direction flag stripped
    pub const fn device_bits(self) -> u32 {
        self.0 & !Self::BIT_IN.0
    }

    /// True when at least one physical device bit is shared.
    ///
    /// The direction flag alone never counts as an overlap.
    pub const fn intersects(self, other: DeviceMask) -> bool {
        self.device_bits() & other.device_bits() != 0
    }

    pub const fn contains(self, other: DeviceMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for DeviceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl BitOr for DeviceMask {
    type Output = DeviceMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        DeviceMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeviceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DeviceMask {
    type Output = DeviceMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        DeviceMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for DeviceMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for DeviceMask {
    type Output = DeviceMask;

    fn not(self) -> Self::Output {
        DeviceMask(!self.0)
    }
}

/// Which half of the device space a stream or route entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Output,
    Input,
}

impl Direction {
    /// Every device bit belonging to this direction
    pub fn all(self) -> DeviceMask {
        match self {
            Direction::Output => DeviceMask::OUT_ALL,
            Direction::Input => DeviceMask::IN_ALL,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => write!(f, "output"),
            Direction::Input => write!(f, "input"),
        }
    }
}

/// Sample encodings understood by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Pcm16Bit,
    Pcm8Bit,
    Pcm32Bit,
    Pcm8_24Bit,
}

impl AudioFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioFormat::Pcm8Bit => 1,
            AudioFormat::Pcm16Bit => 2,
            AudioFormat::Pcm32Bit | AudioFormat::Pcm8_24Bit => 4,
        }
    }
}

/// Stream configuration exchanged with the framework on open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
}

impl AudioConfig {
    /// Size of one frame in bytes
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}

/// Sample rate of the multimedia low-power port
pub const MM_LOW_POWER_SAMPLING_RATE: u32 = 44100;

/// All period sizes must be multiples of this many frames
pub const BASE_FRAME_COUNT: u32 = 24;
pub const SHORT_PERIOD_MULTIPLIER: u32 = 80; // 40 ms
pub const SHORT_PERIOD_SIZE: u32 = BASE_FRAME_COUNT * SHORT_PERIOD_MULTIPLIER;
pub const LONG_PERIOD_MULTIPLIER: u32 = 1; // 40 ms
pub const LONG_PERIOD_SIZE: u32 = SHORT_PERIOD_SIZE * LONG_PERIOD_MULTIPLIER;
pub const PLAYBACK_PERIOD_COUNT: u32 = 4;
pub const CAPTURE_PERIOD_COUNT: u32 = 2;

/// Low-level PCM sample encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcmFormat {
    S16Le,
    S32Le,
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmFormat::S16Le => 2,
            PcmFormat::S32Le => 4,
        }
    }
}

/// Transport-level configuration handed to the PCM collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmConfig {
    pub channels: u16,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
    pub format: PcmFormat,
}

impl PcmConfig {
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Total ring size in frames
    pub fn buffer_frames(&self) -> u32 {
        self.period_size * self.period_count
    }
}

/// Fixed transport presets, selected by stream role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcmProfile {
    LowPowerPlayback,
    Capture,
    VoicePlayback,
    VoiceCapture,
}

impl PcmProfile {
    pub fn config(self) -> PcmConfig {
        let (period_size, period_count) = match self {
            PcmProfile::LowPowerPlayback | PcmProfile::VoicePlayback => {
                (LONG_PERIOD_SIZE, PLAYBACK_PERIOD_COUNT)
            }
            PcmProfile::Capture | PcmProfile::VoiceCapture => {
                (SHORT_PERIOD_SIZE, CAPTURE_PERIOD_COUNT)
            }
        };

        PcmConfig {
            channels: 2,
            rate: MM_LOW_POWER_SAMPLING_RATE,
            period_size,
            period_count,
            format: PcmFormat::S16Le,
        }
    }
}

/// ALSA card indices
pub mod card {
    pub const ABE: u32 = 0;
    pub const HDMI: u32 = 1;
    pub const USB: u32 = 2;
    pub const DEFAULT: u32 = ABE;
}

/// ALSA port (PCM device) indices on the default card
pub mod port {
    pub const MM_LOW_POWER: u32 = 0;
    pub const MM: u32 = 1;
    pub const CODEC: u32 = 2;
    pub const MIC_CAPTURE: u32 = 3;
    pub const BT_OUT: u32 = 4;
    pub const BT_IN: u32 = 5;
    pub const PCM_OUT: u32 = 6;
    pub const PCM_IN: u32 = 7;
}

/// Sample rates accepted for capture
pub const SUPPORTED_INPUT_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 24000, 32000, 44100, 48000];

/// Validate a capture request
pub fn check_input_parameters(sample_rate: u32, format: AudioFormat, channels: u16) -> Result<()> {
    if format != AudioFormat::Pcm16Bit {
        return Err(AudioError::InvalidArgument(format!(
            "unsupported capture format {:?}",
            format
        )));
    }

    if !(1..=2).contains(&channels) {
        return Err(AudioError::InvalidArgument(format!(
            "unsupported capture channel count {}",
            channels
        )));
    }

    if !SUPPORTED_INPUT_RATES.contains(&sample_rate) {
        return Err(AudioError::InvalidArgument(format!(
            "unsupported capture sample rate {}",
            sample_rate
        )));
    }

    Ok(())
}

/// Capture buffer size in bytes for the given request.
///
/// Scales the capture period to the requested rate and rounds up to a
/// multiple of 16 frames.
pub fn input_buffer_size(sample_rate: u32, format: AudioFormat, channels: u16) -> Result<usize> {
    check_input_parameters(sample_rate, format, channels)?;

    let capture = PcmProfile::Capture.config();
    let frames = (capture.period_size as usize * sample_rate as usize) / capture.rate as usize;
    let frames = frames.div_ceil(16) * 16;

    Ok(frames * channels as usize * format.bytes_per_sample())
}
