//! PCM transport abstraction
//!
//! Streams never talk to hardware directly. They ask a [`PcmBackend`] for a
//! [`PcmHandle`] when leaving standby and close it again on standby.

use serde::{Deserialize, Serialize};
use std::fmt;
use tinyhal_core::domain::audio::{Direction, PcmConfig, Result};
use tracing::debug;

/// Everything needed to open one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmRequest {
    pub card: u32,
    pub port: u32,
    pub direction: Direction,
    /// Memory-mapped transfer mode
    pub mmap: bool,
    pub config: PcmConfig,
}

impl fmt::Display for PcmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "card {} port {} {} ({} ch, {} Hz, {} x {})",
            self.card,
            self.port,
            self.direction,
            self.config.channels,
            self.config.rate,
            self.config.period_count,
            self.config.period_size
        )
    }
}

/// An open transport
pub trait PcmHandle: Send {
    /// Blocking write of interleaved frames
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Blocking read filling the whole buffer
    fn read(&mut self, data: &mut [u8]) -> Result<()>;

    /// Release the transport
    fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for transports
pub trait PcmBackend: Send + Sync {
    fn open(&self, request: &PcmRequest) -> Result<Box<dyn PcmHandle>>;
}

/// Transport that discards playback and captures silence
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPcm;

struct NullHandle {
    request: PcmRequest,
    frames: usize,
}

impl PcmBackend for NullPcm {
    fn open(&self, request: &PcmRequest) -> Result<Box<dyn PcmHandle>> {
        debug!("Opening null transport on {}", request);
        Ok(Box::new(NullHandle {
            request: *request,
            frames: 0,
        }))
    }
}

impl PcmHandle for NullHandle {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.frames += data.len() / self.request.config.frame_size().max(1);
        Ok(())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<()> {
        data.fill(0);
        self.frames += data.len() / self.request.config.frame_size().max(1);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("Null transport moved {} frames", self.frames);
        Ok(())
    }
}
