// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming RADAE modem pipelines: resampling, Hilbert transform, spectrum
//! estimation, end-of-over callsign coding and the receive / transmit
//! processing threads.

pub mod audio;
pub mod dsp;
pub mod engine;
pub mod eoo;
pub mod error;
pub mod rx;
pub mod status;
pub mod stream_log;
pub mod tx;

#[cfg(test)]
pub(crate) mod testutil;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use audio::{AbortHandle, AudioBackend, AudioDevice, AudioError, AudioStream, Direction, ReadStatus};
pub use engine::{FeatureExtractor, ModemEngine, ModemProvider, RxOutput, SyncTelemetry, Vocoder};
pub use eoo::EooCallsignCodec;
pub use error::PipelineError;
pub use rx::RxPipeline;
pub use status::{RxStatus, SpectrumSnapshot, TxStatus};
pub use stream_log::StreamErrorLogger;
pub use tx::TxPipeline;

/// Modem (analytic signal) sample rate in Hz.
pub const MODEM_SAMPLE_RATE: u32 = 8_000;
/// Speech sample rate of the vocoder and feature extractor in Hz.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;
/// Samples per 10 ms speech frame at [`SPEECH_SAMPLE_RATE`].
pub const SPEECH_FRAME_SIZE: usize = 160;
/// Floats per feature vector.
pub const NB_TOTAL_FEATURES: usize = 36;
/// Leading features of each vector that the vocoder consumes when priming.
pub const NB_FEATURES: usize = 20;
/// Feature frames per modem frame.
pub const FRAMES_PER_MODEM_FRAME: usize = 12;
