// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use crate::audio::AudioError;

/// Failure to bring a pipeline up. Nothing stays acquired when `open` fails.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("failed to open modem engine: {0}")]
    Engine(String),

    #[error("audio stream reported a zero sample rate")]
    ZeroSampleRate,

    #[error("offline sample buffer is empty after resampling")]
    EmptyInput,

    #[error("pipeline is not open")]
    NotOpen,

    #[error("failed to spawn processing thread: {0}")]
    Spawn(#[from] std::io::Error),
}
