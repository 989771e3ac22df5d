// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operator callsign carried in the end-of-over frame.
//!
//! Layout of the EOO float buffer (interleaved I/Q):
//! - floats `0..112`: 56 QPSK symbols of one LDPC codeword holding
//!   8 six-bit characters plus a CRC-8;
//! - remaining floats: fixed pseudo-random QPSK filler.

mod ldpc;

use std::f32::consts::FRAC_1_SQRT_2;

use ldpc::{IraCode, XorShift32, K, N};

/// Maximum callsign length in characters.
pub const MAX_CALLSIGN_LEN: usize = 8;
/// QPSK symbols carrying the codeword.
pub const CODED_SYMBOLS: usize = N / 2;
/// Floats carrying the codeword.
pub const CODED_FLOATS: usize = N;

const BITS_PER_CHAR: usize = 6;
const PUNCTUATION: &[u8] = b"&'()*+,-./";
const MAX_CHAR_CODE: u8 = 46;
const CRC8_POLY: u8 = 0x07;
const FILLER_SEED: u32 = 0xE00F_111E;
const MAX_BER: f32 = 0.2;

fn char_to_code(c: char) -> Option<u8> {
    let c = c.to_ascii_uppercase();
    match c {
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        '0'..='9' => Some(c as u8 - b'0' + 27),
        _ => PUNCTUATION
            .iter()
            .position(|&p| p as char == c)
            .map(|i| i as u8 + 37),
    }
}

fn code_to_char(code: u8) -> Option<char> {
    match code {
        1..=26 => Some((b'A' + code - 1) as char),
        27..=36 => Some((b'0' + code - 27) as char),
        37..=MAX_CHAR_CODE => Some(PUNCTUATION[(code - 37) as usize] as char),
        _ => None,
    }
}

fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in bytes {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Character codes (zero padded) followed by their CRC, MSB first.
fn pack_data_bits(codes: &[u8; MAX_CALLSIGN_LEN]) -> [u8; K] {
    let mut bits = [0u8; K];
    for (i, &code) in codes.iter().enumerate() {
        for b in 0..BITS_PER_CHAR {
            bits[i * BITS_PER_CHAR + b] = (code >> (BITS_PER_CHAR - 1 - b)) & 1;
        }
    }
    let crc = crc8(codes);
    let base = MAX_CALLSIGN_LEN * BITS_PER_CHAR;
    for b in 0..8 {
        bits[base + b] = (crc >> (7 - b)) & 1;
    }
    bits
}

fn unpack_data_bits(bits: &[u8]) -> ([u8; MAX_CALLSIGN_LEN], u8) {
    let mut codes = [0u8; MAX_CALLSIGN_LEN];
    for (i, code) in codes.iter_mut().enumerate() {
        let chunk = &bits[i * BITS_PER_CHAR..(i + 1) * BITS_PER_CHAR];
        *code = chunk.iter().fold(0, |acc, &b| (acc << 1) | b);
    }
    let base = MAX_CALLSIGN_LEN * BITS_PER_CHAR;
    let crc = bits[base..base + 8].iter().fold(0, |acc, &b| (acc << 1) | b);
    (codes, crc)
}

fn bit_to_level(bit: u8) -> f32 {
    if bit == 0 {
        FRAC_1_SQRT_2
    } else {
        -FRAC_1_SQRT_2
    }
}

/// Encoder / decoder of the EOO callsign block.
pub struct EooCallsignCodec {
    code: IraCode,
}

impl EooCallsignCodec {
    pub fn new() -> Self {
        Self {
            code: IraCode::new(),
        }
    }

    /// Encode `callsign` into `out` (interleaved I/Q floats).
    ///
    /// Unsupported characters are skipped and at most
    /// [`MAX_CALLSIGN_LEN`] are kept. Floats past the codeword are filled
    /// with the fixed filler sequence.
    pub fn encode(&self, callsign: &str, out: &mut [f32]) {
        let mut codes = [0u8; MAX_CALLSIGN_LEN];
        for (slot, code) in codes
            .iter_mut()
            .zip(callsign.chars().filter_map(char_to_code))
        {
            *slot = code;
        }

        let codeword = self.code.encode(&pack_data_bits(&codes));
        self.write_block(&codeword, out);
    }

    fn write_block(&self, codeword: &[u8; N], out: &mut [f32]) {
        let coded = out.len().min(CODED_FLOATS);
        for (dst, &bit) in out[..coded].iter_mut().zip(codeword) {
            *dst = bit_to_level(bit);
        }
        let mut rng = XorShift32::new(FILLER_SEED);
        for dst in &mut out[coded..] {
            *dst = bit_to_level((rng.next_u32() >> 31) as u8);
        }
    }

    /// Convenience wrapper returning a freshly allocated block.
    pub fn encode_to_vec(&self, callsign: &str, n_floats: usize) -> Vec<f32> {
        let mut out = vec![0.0; n_floats];
        self.encode(callsign, &mut out);
        out
    }

    /// Recover the callsign from `sym_count` received symbols.
    ///
    /// Returns `None` when the block is too short, the estimated bit error
    /// rate is too high, the CRC fails or nothing printable was carried.
    pub fn decode(&self, symbols: &[f32], sym_count: usize) -> Option<String> {
        let available = sym_count.min(symbols.len() / 2);
        if available < CODED_SYMBOLS {
            return None;
        }
        let rx = &symbols[..CODED_FLOATS];

        let mean_amp = rx.iter().map(|v| v.abs()).sum::<f32>() / CODED_FLOATS as f32;
        if !mean_amp.is_finite() || mean_amp <= f32::EPSILON {
            return None;
        }
        let llr: [f32; N] = std::array::from_fn(|i| rx[i] / mean_amp);

        let decoded = self.code.decode(&llr);
        let errors = llr
            .iter()
            .zip(&decoded)
            .filter(|(&l, &bit)| u8::from(l < 0.0) != bit)
            .count();
        let ber = errors as f32 / N as f32;
        if ber >= MAX_BER {
            return None;
        }

        let (codes, crc) = unpack_data_bits(&decoded[..K]);
        if crc8(&codes) != crc {
            return None;
        }

        let mut callsign = String::with_capacity(MAX_CALLSIGN_LEN);
        for &code in codes.iter().take_while(|&&c| c != 0) {
            callsign.push(code_to_char(code)?);
        }
        if callsign.is_empty() {
            None
        } else {
            Some(callsign)
        }
    }
}

impl Default for EooCallsignCodec {
    fn default() -> Self {
        Self::new()
    }
}
