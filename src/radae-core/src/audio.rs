// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Uniform audio stream abstraction consumed by the pipelines.
//!
//! Every backend delivers mono 16-bit PCM through blocking `read` / `write`
//! calls. The pipelines never see which backend they are talking to.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => write!(f, "capture"),
            Direction::Playback => write!(f, "playback"),
        }
    }
}

/// A device as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Human-readable name, e.g. "Built-in Microphone".
    pub name: String,
    /// Backend-specific identifier passed back to [`AudioBackend::open`].
    pub id: String,
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio {direction} device '{device}' not found")]
    DeviceNotFound { device: String, direction: Direction },

    #[error("failed to open audio device '{device}': {reason}")]
    Open { device: String, reason: String },

    /// Recoverable fault; the backend already attempted recovery.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// The stream is unusable and must be closed.
    #[error("audio stream failed: {0}")]
    Fatal(String),

    #[error("audio stream aborted")]
    Aborted,
}

impl AudioError {
    /// Whether the pipeline owning the stream has to give up on it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AudioError::Stream(_))
    }
}

/// Successful outcome of a blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    /// Samples were lost before this read; the buffer is still filled.
    Overflow,
}

/// Cloneable handle that unblocks any pending `read` / `write` on a stream
/// from another thread. Further calls fail with [`AudioError::Aborted`]
/// until the stream is started again.
#[derive(Clone)]
pub struct AbortHandle(Arc<dyn Fn() + Send + Sync>);

impl AbortHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(abort))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// An opened mono 16-bit PCM stream. Closing happens on drop.
pub trait AudioStream: Send {
    /// Actual rate negotiated with the device.
    fn sample_rate(&self) -> u32;

    /// Block until `buf` is completely filled.
    fn read(&mut self, buf: &mut [i16]) -> Result<ReadStatus, AudioError>;

    /// Block until all of `buf` has been queued for playback.
    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError>;

    /// Start (or restart after [`AudioStream::stop`] / abort) the stream.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop the stream, discarding buffered data.
    fn stop(&mut self);

    /// Block until queued playback data has been played out.
    fn drain(&mut self);

    fn abort_handle(&self) -> AbortHandle;
}

/// One audio subsystem (cpal host, null device, ...).
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn devices(&self, direction: Direction) -> Result<Vec<AudioDevice>, AudioError>;

    /// Open a stream. The stream is started before it is returned.
    fn open(
        &self,
        device_id: &str,
        direction: Direction,
        channels: u16,
        sample_rate: u32,
        frames_per_buffer: usize,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}
