// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Systematic (112, 56) irregular repeat-accumulate LDPC code.
//!
//! Parity check matrix `H = [A | B]`: `A` is a 56x56 matrix with exactly three
//! ones per row and column, generated from a fixed seed; `B` is the
//! dual-diagonal accumulator, so parity bit `j` is `p[j-1] ^ (A[j] . u)`.

/// Data bits per codeword.
pub const K: usize = 56;
/// Coded bits per codeword.
pub const N: usize = 2 * K;

const COLUMN_WEIGHT: usize = 3;
const MATRIX_SEED: u32 = 0x2A5E_0E00;
const MAX_ITERATIONS: usize = 50;
/// Normalised min-sum scaling.
const ALPHA: f32 = 0.8;

/// Deterministic xorshift32, also used for the EOO filler.
pub(crate) struct XorShift32(u32);

impl XorShift32 {
    pub(crate) fn new(seed: u32) -> Self {
        Self(if seed == 0 { 0x9E37_79B9 } else { seed })
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u32() % n as u32) as usize
    }
}

fn permutation(rng: &mut XorShift32) -> [usize; K] {
    let mut p: [usize; K] = std::array::from_fn(|i| i);
    for i in (1..K).rev() {
        p.swap(i, rng.below(i + 1));
    }
    p
}

pub struct IraCode {
    /// Info-bit columns of each row of `A`.
    rows: Vec<Vec<usize>>,
    /// Variable indices taking part in each check (info bits, then parity).
    checks: Vec<Vec<usize>>,
}

impl IraCode {
    pub fn new() -> Self {
        let mut rng = XorShift32::new(MATRIX_SEED);
        let mut layers: Vec<[usize; K]> = Vec::with_capacity(COLUMN_WEIGHT);
        while layers.len() < COLUMN_WEIGHT {
            let candidate = permutation(&mut rng);
            let clashes = layers
                .iter()
                .any(|layer| layer.iter().zip(&candidate).any(|(a, b)| a == b));
            if !clashes {
                layers.push(candidate);
            }
        }

        let mut rows = vec![Vec::with_capacity(COLUMN_WEIGHT); K];
        for layer in &layers {
            for (col, &row) in layer.iter().enumerate() {
                rows[row].push(col);
            }
        }
        for row in &mut rows {
            row.sort_unstable();
        }

        let checks = rows
            .iter()
            .enumerate()
            .map(|(j, row)| {
                let mut vars = row.clone();
                if j > 0 {
                    vars.push(K + j - 1);
                }
                vars.push(K + j);
                vars
            })
            .collect();

        Self { rows, checks }
    }

    /// Append the accumulator parity to `data`.
    pub fn encode(&self, data: &[u8; K]) -> [u8; N] {
        let mut codeword = [0u8; N];
        codeword[..K].copy_from_slice(data);
        let mut acc = 0u8;
        for (j, row) in self.rows.iter().enumerate() {
            for &col in row {
                acc ^= data[col];
            }
            codeword[K + j] = acc;
        }
        codeword
    }

    pub fn syndrome_ok(&self, codeword: &[u8; N]) -> bool {
        self.checks
            .iter()
            .all(|vars| vars.iter().fold(0u8, |acc, &v| acc ^ codeword[v]) == 0)
    }

    /// Normalised min-sum decoding. Positive LLR means bit 0.
    pub fn decode(&self, llr: &[f32; N]) -> [u8; N] {
        // One message slot per edge, laid out check by check.
        let mut c2v: Vec<Vec<f32>> = self.checks.iter().map(|c| vec![0.0; c.len()]).collect();
        let mut total = *llr;
        let mut hard = [0u8; N];

        for _ in 0..MAX_ITERATIONS {
            for (bit, &t) in hard.iter_mut().zip(&total) {
                *bit = u8::from(t < 0.0);
            }
            if self.syndrome_ok(&hard) {
                return hard;
            }

            for (vars, msgs) in self.checks.iter().zip(c2v.iter_mut()) {
                let mut min1 = f32::INFINITY;
                let mut min2 = f32::INFINITY;
                let mut min_pos = 0;
                let mut sign_prod = 1.0f32;
                let v2c: Vec<f32> = vars
                    .iter()
                    .zip(msgs.iter())
                    .map(|(&v, &m)| total[v] - m)
                    .collect();
                for (pos, &m) in v2c.iter().enumerate() {
                    let mag = m.abs();
                    if m < 0.0 {
                        sign_prod = -sign_prod;
                    }
                    if mag < min1 {
                        min2 = min1;
                        min1 = mag;
                        min_pos = pos;
                    } else if mag < min2 {
                        min2 = mag;
                    }
                }
                for (pos, (msg, &m)) in msgs.iter_mut().zip(&v2c).enumerate() {
                    let sign = if m < 0.0 { -sign_prod } else { sign_prod };
                    let mag = if pos == min_pos { min2 } else { min1 };
                    *msg = ALPHA * sign * mag;
                }
            }

            total = *llr;
            for (vars, msgs) in self.checks.iter().zip(&c2v) {
                for (&v, &m) in vars.iter().zip(msgs) {
                    total[v] += m;
                }
            }
        }

        for (bit, &t) in hard.iter_mut().zip(&total) {
            *bit = u8::from(t < 0.0);
        }
        hard
    }
}

impl Default for IraCode {
    fn default() -> Self {
        Self::new()
    }
}
