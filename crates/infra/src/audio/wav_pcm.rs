//! PCM transport backed by WAV files
//!
//! Every playback session is recorded to its own file in the output
//! directory. Capture replays an optional source file and then yields
//! silence.

use crate::audio::pcm::{PcmBackend, PcmHandle, PcmRequest};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tinyhal_core::domain::audio::{AudioError, Direction, PcmFormat, Result};
use tracing::{debug, info};

fn transport_error(e: hound::Error) -> AudioError {
    AudioError::Transport(e.to_string())
}

fn wav_spec(request: &PcmRequest) -> WavSpec {
    WavSpec {
        channels: request.config.channels,
        sample_rate: request.config.rate,
        bits_per_sample: (request.config.format.bytes_per_sample() * 8) as u16,
        sample_format: SampleFormat::Int,
    }
}

/// Transport factory writing and reading WAV files
#[derive(Debug)]
pub struct WavPcm {
    dir: PathBuf,
    capture_source: Option<PathBuf>,
    sessions: AtomicUsize,
}

impl WavPcm {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            capture_source: None,
            sessions: AtomicUsize::new(0),
        }
    }

    /// Replay this file on capture instead of silence
    pub fn with_capture_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_source = Some(path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn playback_path(&self, request: &PcmRequest) -> PathBuf {
        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "playback-c{}p{}-{:03}.wav",
            request.card, request.port, session
        ))
    }
}

impl PcmBackend for WavPcm {
    fn open(&self, request: &PcmRequest) -> Result<Box<dyn PcmHandle>> {
        match request.direction {
            Direction::Output => {
                let path = self.playback_path(request);
                let writer = WavWriter::create(&path, wav_spec(request)).map_err(|e| {
                    AudioError::Transport(format!("{}: {}", path.display(), e))
                })?;
                info!(path = %path.display(), "Recording playback");

                Ok(Box::new(WavPlayback {
                    writer,
                    format: request.config.format,
                }))
            }
            Direction::Input => {
                let reader = match &self.capture_source {
                    Some(path) => {
                        let reader = WavReader::open(path).map_err(|e| {
                            AudioError::Transport(format!("{}: {}", path.display(), e))
                        })?;
                        info!(path = %path.display(), "Replaying capture source");
                        Some(reader)
                    }
                    None => None,
                };

                Ok(Box::new(WavCapture { reader }))
            }
        }
    }
}

struct WavPlayback {
    writer: WavWriter<BufWriter<File>>,
    format: PcmFormat,
}

impl PcmHandle for WavPlayback {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.format {
            PcmFormat::S16Le => {
                for chunk in data.chunks_exact(2) {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    self.writer.write_sample(sample).map_err(transport_error)?;
                }
            }
            PcmFormat::S32Le => {
                for chunk in data.chunks_exact(4) {
                    let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    self.writer.write_sample(sample).map_err(transport_error)?;
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, _data: &mut [u8]) -> Result<()> {
        Err(AudioError::Transport("playback transport cannot capture".to_string()))
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("Finalizing {} playback samples", self.writer.len());
        self.writer.finalize().map_err(transport_error)
    }
}

struct WavCapture {
    reader: Option<WavReader<BufReader<File>>>,
}

impl PcmHandle for WavCapture {
    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Err(AudioError::Transport("capture transport cannot play".to_string()))
    }

    fn read(&mut self, data: &mut [u8]) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            data.fill(0);
            return Ok(());
        };

        let mut samples = reader.samples::<i16>();
        for chunk in data.chunks_mut(2) {
            let sample = match samples.next() {
                Some(sample) => sample.map_err(transport_error)?,
                None => 0,
            };
            let bytes = sample.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
