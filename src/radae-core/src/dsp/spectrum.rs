// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::status::SpectrumSnapshot;

/// FFT length of the display spectrum.
pub const FFT_SIZE: usize = 512;

/// Bins published per snapshot (positive frequencies of a real input).
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2;

/// Bins below this magnitude are reported at [`FLOOR_DB`].
const MIN_MAGNITUDE: f32 = 1e-10;
const FLOOR_DB: f32 = -200.0;

/// Hann-windowed magnitude spectrum of the most recent [`FFT_SIZE`] samples.
pub struct SpectrumAnalyzer {
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buf: Vec<Complex<f32>>,
    bins: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        assert!(FFT_SIZE.is_power_of_two());
        let hann_window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (FFT_SIZE - 1) as f32).cos()))
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            hann_window,
            fft,
            buf: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            bins: vec![FLOOR_DB; SPECTRUM_BINS],
        }
    }

    /// Compute the spectrum of the last [`FFT_SIZE`] samples of `samples`.
    ///
    /// Returns `None` while fewer than [`FFT_SIZE`] samples are available.
    pub fn analyze(&mut self, samples: &[f32]) -> Option<&[f32]> {
        if samples.len() < FFT_SIZE {
            return None;
        }
        let recent = &samples[samples.len() - FFT_SIZE..];
        for ((dst, &s), &w) in self.buf.iter_mut().zip(recent).zip(&self.hann_window) {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buf);

        let norm = FFT_SIZE as f32 * 0.5;
        for (bin, value) in self.bins.iter_mut().zip(&self.buf[..SPECTRUM_BINS]) {
            let mag = value.norm() / norm;
            *bin = if mag > MIN_MAGNITUDE {
                20.0 * mag.log10()
            } else {
                FLOOR_DB
            };
        }
        Some(&self.bins)
    }

    /// Analyze and publish into `snapshot`. Returns whether it was updated.
    pub fn update(&mut self, samples: &[f32], snapshot: &SpectrumSnapshot) -> bool {
        match self.analyze(samples) {
            Some(bins) => {
                snapshot.publish(bins);
                true
            }
            None => false,
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
