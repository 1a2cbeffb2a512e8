//! Host audio transport using CPAL
//!
//! Each open transport runs its CPAL stream on a dedicated thread, since
//! streams are not `Send` on every platform. Frames cross the thread boundary
//! through bounded channels, which gives blocking writes the same
//! back-pressure a hardware ring buffer would.

use crate::audio::pcm::{PcmBackend, PcmHandle, PcmRequest};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use tinyhal_core::domain::audio::{AudioError, Direction, PcmFormat, Result};
use tracing::{debug, error, info};

type Frames = Vec<f32>;

fn decode(format: PcmFormat, data: &[u8]) -> Frames {
    match format {
        PcmFormat::S16Le => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect(),
        PcmFormat::S32Le => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
    }
}

fn encode(format: PcmFormat, sample: f32, out: &mut [u8]) {
    let sample = sample.clamp(-1.0, 1.0);
    match format {
        PcmFormat::S16Le => {
            let bytes = ((sample * 32767.0) as i16).to_le_bytes();
            out.copy_from_slice(&bytes[..out.len()]);
        }
        PcmFormat::S32Le => {
            let bytes = ((sample as f64 * 2_147_483_647.0) as i32).to_le_bytes();
            out.copy_from_slice(&bytes[..out.len()]);
        }
    }
}

/// Transport factory for the host's default devices
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalPcm;

enum Flow {
    Playback(Sender<Frames>),
    Capture {
        receiver: Receiver<Frames>,
        pending: VecDeque<f32>,
    },
}

struct CpalHandle {
    flow: Flow,
    format: PcmFormat,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

fn build_stream(request: &PcmRequest, flow: FlowEnd) -> Result<Stream> {
    let host = cpal::default_host();
    let config = CpalStreamConfig {
        channels: request.config.channels,
        sample_rate: request.config.rate,
        buffer_size: cpal::BufferSize::Fixed(request.config.period_size),
    };

    match flow {
        FlowEnd::Playback(receiver) => {
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::NoDevice("no default output device".to_string()))?;

            let mut pending: VecDeque<f32> = VecDeque::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        while pending.len() < data.len() {
                            match receiver.try_recv() {
                                Ok(frames) => pending.extend(frames),
                                Err(_) => break,
                            }
                        }
                        for slot in data.iter_mut() {
                            // Underrun plays silence
                            *slot = pending.pop_front().unwrap_or(0.0);
                        }
                    },
                    |err| error!("Output stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Transport(format!("Failed to build stream: {}", e)))
        }
        FlowEnd::Capture(sender) => {
            let device = host
                .default_input_device()
                .ok_or_else(|| AudioError::NoDevice("no default input device".to_string()))?;

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let _ = sender.try_send(data.to_vec());
                    },
                    |err| error!("Input stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Transport(format!("Failed to build stream: {}", e)))
        }
    }
}

/// Stream-side channel end moved onto the worker thread
enum FlowEnd {
    Playback(Receiver<Frames>),
    Capture(Sender<Frames>),
}

impl PcmBackend for CpalPcm {
    fn open(&self, request: &PcmRequest) -> Result<Box<dyn PcmHandle>> {
        info!("Opening host transport on {}", request);

        let depth = request.config.period_count.max(1) as usize;
        let (flow, end) = match request.direction {
            Direction::Output => {
                let (sender, receiver) = bounded(depth);
                (Flow::Playback(sender), FlowEnd::Playback(receiver))
            }
            Direction::Input => {
                let (sender, receiver) = bounded(depth);
                (
                    Flow::Capture {
                        receiver,
                        pending: VecDeque::new(),
                    },
                    FlowEnd::Capture(sender),
                )
            }
        };

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let request_copy = *request;

        let worker = thread::Builder::new()
            .name("tinyhal-pcm".to_string())
            .spawn(move || {
                let stream = match build_stream(&request_copy, end) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Transport(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                // Runs until the handle drops its sender
                let _ = shutdown_rx.recv();
                debug!("Host transport thread exiting");
            })
            .map_err(|e| AudioError::OutOfMemory(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Transport("transport thread exited".to_string()))??;

        Ok(Box::new(CpalHandle {
            flow,
            format: request.config.format,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }))
    }
}

impl CpalHandle {
    fn stop(&mut self) -> Result<()> {
        self.shutdown.take();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| AudioError::Transport("transport thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl PcmHandle for CpalHandle {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let Flow::Playback(sender) = &self.flow else {
            return Err(AudioError::Transport("Not an output stream".to_string()));
        };

        sender
            .send(decode(self.format, data))
            .map_err(|_| AudioError::Transport("Failed to send audio data".to_string()))
    }

    fn read(&mut self, data: &mut [u8]) -> Result<()> {
        let Flow::Capture { receiver, pending } = &mut self.flow else {
            return Err(AudioError::Transport("Not an input stream".to_string()));
        };

        let width = match self.format {
            PcmFormat::S16Le => 2,
            PcmFormat::S32Le => 4,
        };
        let needed = data.len() / width;

        while pending.len() < needed {
            let frames = receiver
                .recv()
                .map_err(|_| AudioError::Transport("Capture stream ended".to_string()))?;
            pending.extend(frames);
        }

        for chunk in data.chunks_mut(width) {
            let sample = pending.pop_front().unwrap_or(0.0);
            encode(self.format, sample, chunk);
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.stop()
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error stopping host transport: {}", e);
        }
    }
}
