// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Dummy modem engine for development and testing.
//!
//! Never acquires sync. Transmits a steady pilot tone so the radio side has
//! something to look at, and sends the installed end-of-over payload as raw
//! QPSK symbols. No model files required.

use std::f32::consts::TAU;

use num_complex::Complex;
use radae_core::{
    DynResult, FeatureExtractor, ModemEngine, ModemProvider, RxOutput, SyncTelemetry, Vocoder,
    FRAMES_PER_MODEM_FRAME, MODEM_SAMPLE_RATE, NB_TOTAL_FEATURES,
};

const NIN: usize = 960;
const NIN_MAX: usize = 1280;
const N_EOO_BITS: usize = 240;
const N_TX_OUT: usize = 960;
const N_TX_EOO_OUT: usize = 1152;
const PILOT_HZ: f32 = 1500.0;
const PILOT_AMPLITUDE: f32 = 0.25;

pub struct DummyEngine {
    phase: f32,
    eoo_bits: Vec<f32>,
}

impl DummyEngine {
    pub fn new() -> Self {
        Self {
            phase: 0.0,
            eoo_bits: vec![0.0; N_EOO_BITS],
        }
    }
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemEngine for DummyEngine {
    fn nin(&self) -> usize {
        NIN
    }

    fn nin_max(&self) -> usize {
        NIN_MAX
    }

    fn n_features_in_out(&self) -> usize {
        FRAMES_PER_MODEM_FRAME * NB_TOTAL_FEATURES
    }

    fn n_eoo_bits(&self) -> usize {
        N_EOO_BITS
    }

    fn n_tx_out(&self) -> usize {
        N_TX_OUT
    }

    fn n_tx_eoo_out(&self) -> usize {
        N_TX_EOO_OUT
    }

    fn receive(&mut self, _symbols: &[Complex<f32>], _features: &mut [f32], _eoo_bits: &mut [f32]) -> RxOutput {
        RxOutput {
            n_features: 0,
            eoo: false,
            sync: SyncTelemetry::default(),
        }
    }

    fn transmit(&mut self, _features: &[f32], out: &mut [Complex<f32>]) -> usize {
        let step = TAU * PILOT_HZ / MODEM_SAMPLE_RATE as f32;
        for sample in out.iter_mut().take(N_TX_OUT) {
            *sample = Complex::from_polar(PILOT_AMPLITUDE, self.phase);
            self.phase = (self.phase + step) % TAU;
        }
        N_TX_OUT.min(out.len())
    }

    fn transmit_eoo(&mut self, out: &mut [Complex<f32>]) -> usize {
        let n = N_TX_EOO_OUT.min(out.len());
        out[..n].fill(Complex::new(0.0, 0.0));
        for (sample, pair) in out[..n].iter_mut().zip(self.eoo_bits.chunks_exact(2)) {
            *sample = Complex::new(pair[0], pair[1]) * PILOT_AMPLITUDE;
        }
        n
    }

    fn set_eoo_bits(&mut self, bits: &[f32]) {
        let n = bits.len().min(N_EOO_BITS);
        self.eoo_bits[..n].copy_from_slice(&bits[..n]);
        self.eoo_bits[n..].fill(0.0);
    }
}

/// Vocoder producing silence.
#[derive(Default)]
pub struct SilentVocoder;

impl Vocoder for SilentVocoder {
    fn reset(&mut self) {}

    fn prime(&mut self, _silence: &[f32], _frames: &[f32]) {}

    fn synthesize(&mut self, _features: &[f32], pcm: &mut [f32]) {
        pcm.fill(0.0);
    }
}

/// Extractor reporting the frame energy in the first feature and zero
/// elsewhere.
#[derive(Default)]
pub struct EnergyExtractor;

impl FeatureExtractor for EnergyExtractor {
    fn extract(&mut self, pcm: &[i16], features: &mut [f32]) {
        features.fill(0.0);
        if pcm.is_empty() {
            return;
        }
        let energy: f32 = pcm
            .iter()
            .map(|&s| {
                let x = s as f32 / 32768.0;
                x * x
            })
            .sum::<f32>()
            / pcm.len() as f32;
        if let Some(first) = features.first_mut() {
            *first = 10.0 * (energy + 1e-10).log10();
        }
    }
}

#[derive(Debug, Default)]
pub struct DummyProvider;

impl DummyProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ModemProvider for DummyProvider {
    fn open_engine(&self) -> DynResult<Box<dyn ModemEngine>> {
        Ok(Box::new(DummyEngine::new()))
    }

    fn open_vocoder(&self) -> DynResult<Box<dyn Vocoder>> {
        Ok(Box::new(SilentVocoder))
    }

    fn open_feature_extractor(&self) -> DynResult<Box<dyn FeatureExtractor>> {
        Ok(Box::new(EnergyExtractor))
    }
}
