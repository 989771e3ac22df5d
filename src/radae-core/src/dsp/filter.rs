// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;

/// Default band-pass taps at the modem rate.
pub const BPF_NTAPS: usize = 101;
pub const BPF_CENTER_HZ: f32 = 1_600.0;
pub const BPF_BANDWIDTH_HZ: f32 = 1_500.0;

/// Hann-windowed sinc low-pass shifted up to `center_norm`.
///
/// Frequencies are normalised to the sample rate. The result has unity gain
/// at the center frequency.
fn band_pass_coeffs(center_norm: f32, bandwidth_norm: f32, taps: usize) -> Vec<f32> {
    assert!(taps >= 1, "FIR filter must have at least 1 tap");
    let cutoff = bandwidth_norm / 2.0;
    let m = (taps - 1) as f32;
    let mut coeffs = Vec::with_capacity(taps);
    for i in 0..taps {
        let x = i as f32 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * x).sin() / (PI * x)
        };
        let window = if taps == 1 {
            1.0
        } else {
            0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos())
        };
        coeffs.push(2.0 * sinc * window * (2.0 * PI * center_norm * x).cos());
    }

    let (mut re, mut im) = (0.0f64, 0.0f64);
    for (i, &c) in coeffs.iter().enumerate() {
        let w = 2.0 * std::f64::consts::PI * center_norm as f64 * i as f64;
        re += c as f64 * w.cos();
        im -= c as f64 * w.sin();
    }
    let gain = (re * re + im * im).sqrt() as f32;
    if gain > 1e-12 {
        let inv = 1.0 / gain;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    coeffs
}

/// Real FIR band-pass applied sample by sample to the transmit signal.
pub struct BandPassFilter {
    coeffs: Vec<f32>,
    state: Vec<f32>,
    pos: usize,
}

impl BandPassFilter {
    pub fn new(center_hz: f32, bandwidth_hz: f32, sample_rate: f32, taps: usize) -> Self {
        let coeffs = band_pass_coeffs(center_hz / sample_rate, bandwidth_hz / sample_rate, taps);
        Self {
            state: vec![0.0; coeffs.len()],
            coeffs,
            pos: 0,
        }
    }

    /// The transmit filter at the 8 kHz modem rate.
    pub fn modem_default() -> Self {
        Self::new(
            BPF_CENTER_HZ,
            BPF_BANDWIDTH_HZ,
            crate::MODEM_SAMPLE_RATE as f32,
            BPF_NTAPS,
        )
    }

    pub fn reset(&mut self) {
        self.state.fill(0.0);
        self.pos = 0;
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        let n = self.state.len();
        self.state[self.pos] = sample;
        let mut acc = 0.0;
        let mut idx = self.pos;
        for &c in &self.coeffs {
            acc += c * self.state[idx];
            idx = if idx == 0 { n - 1 } else { idx - 1 };
        }
        self.pos = (self.pos + 1) % n;
        acc
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.process(*s);
        }
    }
}
