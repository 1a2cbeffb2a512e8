//! Audio device, stream lifecycle and transport backends
//!
//! Transports:
//! - [`NullPcm`]: discards playback, captures silence
//! - [`WavPcm`]: records playback to WAV files through hound
//! - `CpalPcm`: host audio devices through CPAL (feature `cpal`)

pub mod device;
pub mod params;
pub mod pcm;
pub mod sim_mixer;
pub mod stream;
pub mod wav_pcm;

#[cfg(feature = "cpal")]
pub mod cpal_pcm;

pub use device::*;
pub use params::*;
pub use pcm::*;
pub use sim_mixer::*;
pub use stream::*;
pub use wav_pcm::*;

#[cfg(feature = "cpal")]
pub use cpal_pcm::*;
