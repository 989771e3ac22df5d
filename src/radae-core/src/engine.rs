// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Call contracts of the neural modem, the vocoder and the feature extractor.
//!
//! The pipelines treat all three as opaque transforms. Real implementations
//! wrap the native model; the dummy backend and the unit tests provide
//! scripted ones.

use num_complex::Complex;

use crate::DynResult;

/// Synchronization telemetry reported after every receive call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncTelemetry {
    pub synced: bool,
    /// SNR estimate in dB, normalised to a 3 kHz noise bandwidth.
    pub snr_db: f32,
    pub freq_offset_hz: f32,
}

/// Result of one [`ModemEngine::receive`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxOutput {
    /// Number of feature floats written (a multiple of the feature width).
    pub n_features: usize,
    /// An end-of-over frame was detected; the EOO bits buffer is valid.
    pub eoo: bool,
    pub sync: SyncTelemetry,
}

/// The RADAE modem: analytic symbols in, feature vectors out and back.
pub trait ModemEngine: Send {
    /// Analytic symbols required by the next [`ModemEngine::receive`] call.
    fn nin(&self) -> usize;

    /// Upper bound of [`ModemEngine::nin`].
    fn nin_max(&self) -> usize;

    /// Feature floats produced per receive / consumed per transmit call.
    fn n_features_in_out(&self) -> usize;

    /// Floats in the end-of-over payload (interleaved I/Q).
    fn n_eoo_bits(&self) -> usize;

    /// Symbols produced by one [`ModemEngine::transmit`] call.
    fn n_tx_out(&self) -> usize;

    /// Symbols produced by [`ModemEngine::transmit_eoo`].
    fn n_tx_eoo_out(&self) -> usize;

    /// Demodulate exactly `nin()` symbols.
    ///
    /// `features` holds at least `n_features_in_out()` floats and `eoo_bits`
    /// at least `n_eoo_bits()`.
    fn receive(
        &mut self,
        symbols: &[Complex<f32>],
        features: &mut [f32],
        eoo_bits: &mut [f32],
    ) -> RxOutput;

    /// Modulate one modem frame of features. Returns the symbols written.
    fn transmit(&mut self, features: &[f32], out: &mut [Complex<f32>]) -> usize;

    /// Produce the end-of-over frame. Returns the symbols written.
    fn transmit_eoo(&mut self, out: &mut [Complex<f32>]) -> usize;

    /// Install the payload carried by subsequent end-of-over frames.
    fn set_eoo_bits(&mut self, bits: &[f32]);
}

/// Speech synthesizer driven by feature vectors.
pub trait Vocoder: Send {
    /// Return to the freshly initialised state.
    fn reset(&mut self);

    /// Prime the internal state.
    ///
    /// `silence` is the seed PCM history and `frames` holds the priming
    /// feature frames packed at a stride of [`crate::NB_FEATURES`].
    fn prime(&mut self, silence: &[f32], frames: &[f32]);

    /// Synthesize one 10 ms frame (`pcm.len()` samples at 16 kHz).
    fn synthesize(&mut self, features: &[f32], pcm: &mut [f32]);
}

/// Speech analysis front end of the transmitter.
pub trait FeatureExtractor: Send {
    /// Compute one feature vector from a 10 ms PCM frame at 16 kHz.
    fn extract(&mut self, pcm: &[i16], features: &mut [f32]);
}

/// Factory for the opaque collaborators, called from pipeline `open()`.
pub trait ModemProvider: Send + Sync {
    fn open_engine(&self) -> DynResult<Box<dyn ModemEngine>>;

    fn open_vocoder(&self) -> DynResult<Box<dyn Vocoder>>;

    fn open_feature_extractor(&self) -> DynResult<Box<dyn FeatureExtractor>>;
}
