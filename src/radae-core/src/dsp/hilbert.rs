// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Real-to-analytic conversion with a windowed FIR Hilbert transformer.

use std::f32::consts::PI;

use num_complex::Complex;

/// Tap count used by the receive pipeline.
pub const HILBERT_NTAPS: usize = 127;

/// Streaming Hilbert transformer producing one analytic sample per input.
///
/// The imaginary branch is the FIR output; the real branch is the input
/// delayed by the FIR group delay `(NTAPS - 1) / 2` so both are aligned.
#[derive(Debug, Clone)]
pub struct HilbertFilter<const NTAPS: usize = HILBERT_NTAPS> {
    coeffs: [f32; NTAPS],
    hist: [f32; NTAPS],
    pos: usize,
    delay: [f32; NTAPS],
    delay_pos: usize,
}

impl<const NTAPS: usize> HilbertFilter<NTAPS> {
    pub const DELAY: usize = (NTAPS - 1) / 2;

    pub fn new() -> Self {
        assert!(NTAPS % 2 == 1, "Hilbert transformer needs an odd tap count");
        Self {
            coeffs: hilbert_coeffs::<NTAPS>(),
            hist: [0.0; NTAPS],
            pos: 0,
            delay: [0.0; NTAPS],
            delay_pos: 0,
        }
    }

    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }

    pub fn reset(&mut self) {
        self.hist = [0.0; NTAPS];
        self.delay = [0.0; NTAPS];
        self.pos = 0;
        self.delay_pos = 0;
    }

    pub fn process(&mut self, sample: f32) -> Complex<f32> {
        self.hist[self.pos] = sample;

        let mut imag = 0.0f32;
        for (k, &c) in self.coeffs.iter().enumerate() {
            let idx = (self.pos + NTAPS - k) % NTAPS;
            imag += c * self.hist[idx];
        }

        self.delay[self.delay_pos] = sample;
        let read_pos = (self.delay_pos + NTAPS - Self::DELAY) % NTAPS;
        let real = self.delay[read_pos];

        self.pos = (self.pos + 1) % NTAPS;
        self.delay_pos = (self.delay_pos + 1) % NTAPS;

        Complex::new(real, imag)
    }

    /// Transform `input` into `out` one-to-one. Both slices must match in length.
    pub fn process_block(&mut self, input: &[f32], out: &mut [Complex<f32>]) {
        debug_assert_eq!(input.len(), out.len());
        for (dst, &sample) in out.iter_mut().zip(input) {
            *dst = self.process(sample);
        }
    }
}

impl<const NTAPS: usize> Default for HilbertFilter<NTAPS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming-windowed ideal Hilbert kernel: zero on even offsets from the
/// centre, `2 / (pi * n)` on odd offsets.
fn hilbert_coeffs<const NTAPS: usize>() -> [f32; NTAPS] {
    let center = (NTAPS as isize - 1) / 2;
    std::array::from_fn(|i| {
        let n = i as isize - center;
        if n % 2 == 0 {
            0.0
        } else {
            let h = 2.0 / (PI * n as f32);
            let w = 0.54 - 0.46 * (2.0 * PI * i as f32 / (NTAPS - 1) as f32).cos();
            h * w
        }
    })
}
