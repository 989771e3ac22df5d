// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Signal-processing building blocks shared by both pipelines.

pub mod filter;
pub mod hilbert;
pub mod resampler;
pub mod spectrum;

pub use filter::BandPassFilter;
pub use hilbert::HilbertFilter;
pub use resampler::{resample_batch, StreamingResampler};
pub use spectrum::SpectrumAnalyzer;

/// Full-scale value used for 16-bit PCM conversion.
pub const PCM_SCALE: f32 = 32768.0;
const PCM_CLAMP: f32 = 32767.0;

/// Append `pcm` to `out` as floats in [-1, 1).
pub fn pcm_to_f32(pcm: &[i16], out: &mut Vec<f32>) {
    out.extend(pcm.iter().map(|&s| s as f32 / PCM_SCALE));
}

/// Scale, clamp to ±32767 and round half up.
pub fn f32_to_pcm_rounded(sample: f32, scale: f32) -> i16 {
    let v = (sample * scale).clamp(-PCM_CLAMP, PCM_CLAMP);
    (0.5 + v as f64).floor() as i16
}

/// Scale, clamp to ±32767 and truncate toward zero.
pub fn f32_to_pcm_truncated(sample: f32, scale: f32) -> i16 {
    (sample * scale).clamp(-PCM_CLAMP, PCM_CLAMP) as i16
}

/// Root-mean-square of a block, accumulated in double precision.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum2: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum2 / samples.len() as f64).sqrt() as f32
}
