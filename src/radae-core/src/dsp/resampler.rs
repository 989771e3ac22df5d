// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Linear-interpolation sample-rate conversion.

/// Streaming linear-interpolation resampler.
///
/// The fractional read position and the last input sample are carried
/// between calls, so the output does not depend on how the input stream is
/// split into blocks.
#[derive(Debug, Clone, Copy)]
pub struct StreamingResampler {
    rate_in: u32,
    rate_out: u32,
    step: f64,
    frac: f64,
    prev: f32,
}

impl StreamingResampler {
    pub fn new(rate_in: u32, rate_out: u32) -> Self {
        assert!(rate_in > 0 && rate_out > 0, "sample rates must be non-zero");
        Self {
            rate_in,
            rate_out,
            step: rate_in as f64 / rate_out as f64,
            frac: 0.0,
            prev: 0.0,
        }
    }

    pub fn rate_in(&self) -> u32 {
        self.rate_in
    }

    pub fn rate_out(&self) -> u32 {
        self.rate_out
    }

    pub fn reset(&mut self) {
        self.frac = 0.0;
        self.prev = 0.0;
    }

    /// Output capacity sufficient for one call with `n_in` input samples.
    pub fn max_output_len(&self, n_in: usize) -> usize {
        n_in * self.rate_out as usize / self.rate_in as usize + 2
    }

    /// Resample `input` into `out`, writing at most `out.len()` samples.
    /// Returns the number of samples written.
    pub fn process(&mut self, input: &[f32], out: &mut [f32]) -> usize {
        let mut n_out = 0;
        self.run(input, out.len(), |s| {
            out[n_out] = s;
            n_out += 1;
        });
        n_out
    }

    /// Resample `input`, appending every produced sample to `out`.
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        out.reserve(self.max_output_len(input.len()));
        let before = out.len();
        self.run(input, usize::MAX, |s| out.push(s));
        out.len() - before
    }

    fn run(&mut self, input: &[f32], max_out: usize, mut emit: impl FnMut(f32)) {
        let n_in = input.len();
        if n_in == 0 {
            return;
        }

        if self.rate_in == self.rate_out {
            input.iter().take(max_out).for_each(|&s| emit(s));
            self.prev = input[n_in - 1];
            return;
        }

        let mut produced = 0;
        while produced < max_out {
            let idx = self.frac as usize;
            if idx >= n_in {
                break;
            }
            let f = (self.frac - idx as f64) as f32;
            let s0 = if idx == 0 { self.prev } else { input[idx - 1] };
            let s1 = input[idx];
            emit(s0 + f * (s1 - s0));
            produced += 1;
            self.frac += self.step;
        }

        self.prev = input[n_in - 1];
        // Keep the phase relative to the start of the next block.
        self.frac -= n_in as f64;
    }
}

/// One-shot resampling of a complete buffer.
///
/// Produces `floor(n_in * rate_out / rate_in)` samples. Inputs shorter than
/// two samples cannot be interpolated and yield an empty result.
pub fn resample_batch(input: &[f32], rate_in: u32, rate_out: u32) -> Vec<f32> {
    if rate_in == rate_out {
        return input.to_vec();
    }
    let n_in = input.len();
    if n_in < 2 || rate_in == 0 || rate_out == 0 {
        return Vec::new();
    }

    let n_out = (n_in as f64 * rate_out as f64 / rate_in as f64) as usize;
    let step = rate_in as f64 / rate_out as f64;
    (0..n_out)
        .map(|i| {
            let pos = i as f64 * step;
            let mut idx = pos as usize;
            let mut frac = (pos - idx as f64) as f32;
            if idx + 1 >= n_in {
                idx = n_in - 2;
                frac = 1.0;
            }
            input[idx] + frac * (input[idx + 1] - input[idx])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect()
    }

    #[test]
    fn identity_rate_copies_for_any_segmentation() {
        let input = ramp(1000);
        for chunk in [1usize, 7, 160, 512, 1000] {
            let mut rs = StreamingResampler::new(8_000, 8_000);
            let mut out = Vec::new();
            for block in input.chunks(chunk) {
                rs.process_into(block, &mut out);
            }
            assert_eq!(out, input, "chunk size {}", chunk);
        }
    }

    #[test]
    fn split_calls_match_single_call() {
        // 4001 samples keep the final read position off an integer boundary.
        let input = ramp(4001);
        for (rate_in, rate_out) in [(48_000, 8_000), (44_100, 8_000), (8_000, 16_000), (8_000, 44_100)] {
            let mut whole = StreamingResampler::new(rate_in, rate_out);
            let mut expected = Vec::new();
            whole.process_into(&input, &mut expected);

            for chunk in [1usize, 3, 160, 512, 999] {
                let mut split = StreamingResampler::new(rate_in, rate_out);
                let mut got = Vec::new();
                for block in input.chunks(chunk) {
                    split.process_into(block, &mut got);
                }
                assert_eq!(got.len(), expected.len(), "{}->{} chunk {}", rate_in, rate_out, chunk);
                for (a, b) in got.iter().zip(&expected) {
                    assert!((a - b).abs() < 1e-4, "{}->{} chunk {}", rate_in, rate_out, chunk);
                }
            }
        }
    }

    #[test]
    fn output_count_follows_rate_ratio() {
        let mut rs = StreamingResampler::new(48_000, 8_000);
        let mut out = Vec::new();
        for _ in 0..100 {
            rs.process_into(&[0.25; 480], &mut out);
        }
        assert_eq!(out.len(), 8_000);
    }

    #[test]
    fn empty_input_leaves_state_untouched() {
        let mut rs = StreamingResampler::new(16_000, 8_000);
        let mut out = [0.0f32; 4];
        assert_eq!(rs.process(&[1.0, 1.0], &mut out), 1);
        let before = (rs.frac, rs.prev);
        assert_eq!(rs.process(&[], &mut out), 0);
        assert_eq!((rs.frac, rs.prev), before);
    }

    #[test]
    fn first_sample_interpolates_from_carry() {
        let mut rs = StreamingResampler::new(8_000, 16_000);
        let mut out = [0.0f32; 8];
        let n = rs.process(&[1.0, 1.0], &mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn output_is_bounded_by_capacity() {
        let mut rs = StreamingResampler::new(8_000, 48_000);
        let mut out = [0.0f32; 10];
        assert_eq!(rs.process(&[0.1; 100], &mut out), 10);
    }

    #[test]
    fn batch_resample_length_and_short_input() {
        assert_eq!(resample_batch(&[1.0; 4800], 48_000, 8_000).len(), 800);
        assert!(resample_batch(&[1.0], 48_000, 8_000).is_empty());
        assert_eq!(resample_batch(&[0.1, 0.2], 8_000, 8_000), vec![0.1, 0.2]);
    }

    #[test]
    fn batch_resample_interpolates_linearly() {
        let out = resample_batch(&[0.0, 1.0, 2.0, 3.0], 8_000, 16_000);
        assert_eq!(out.len(), 8);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
        // Positions past the last pair clamp to its end.
        assert!((out[7] - 3.0).abs() < 1e-6);
    }
}
