// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Status published by the processing threads and polled by the caller.
//!
//! Scalars are lock-free atomics; the spectrum and the callsign sit behind a
//! mutex and are always handed out as copies.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `f32` stored as its bit pattern in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Latest spectrum in dB, single writer / many readers.
#[derive(Debug)]
pub struct SpectrumSnapshot {
    bins: Mutex<Vec<f32>>,
    sample_rate: f32,
}

impl SpectrumSnapshot {
    pub fn new(bins: usize, sample_rate: f32) -> Self {
        Self {
            bins: Mutex::new(vec![0.0; bins]),
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.bins).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate the bins refer to; bin `i` covers `i * rate / (2 * len)` Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn publish(&self, bins: &[f32]) {
        let mut guard = lock(&self.bins);
        let n = guard.len().min(bins.len());
        guard[..n].copy_from_slice(&bins[..n]);
    }

    pub fn snapshot(&self) -> Vec<f32> {
        lock(&self.bins).clone()
    }

    /// Copy up to `out.len()` bins, returning how many were copied.
    pub fn copy_into(&self, out: &mut [f32]) -> usize {
        let guard = lock(&self.bins);
        let n = guard.len().min(out.len());
        out[..n].copy_from_slice(&guard[..n]);
        n
    }

    pub fn clear(&self) {
        lock(&self.bins).fill(0.0);
    }
}

/// Status of the receive pipeline.
#[derive(Debug)]
pub struct RxStatus {
    pub running: AtomicBool,
    pub synced: AtomicBool,
    pub snr_db: AtomicF32,
    pub freq_offset_hz: AtomicF32,
    pub input_level: AtomicF32,
    pub output_level: AtomicF32,
    pub spectrum: SpectrumSnapshot,
    callsign: Mutex<Option<String>>,
}

impl RxStatus {
    pub fn new(spectrum_bins: usize, spectrum_rate: f32) -> Self {
        Self {
            running: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            snr_db: AtomicF32::new(0.0),
            freq_offset_hz: AtomicF32::new(0.0),
            input_level: AtomicF32::new(0.0),
            output_level: AtomicF32::new(0.0),
            spectrum: SpectrumSnapshot::new(spectrum_bins, spectrum_rate),
            callsign: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_callsign(&self, callsign: String) {
        *lock(&self.callsign) = Some(callsign);
    }

    pub fn last_callsign(&self) -> Option<String> {
        lock(&self.callsign).clone()
    }

    /// Neutral values after the thread stopped.
    pub fn reset_levels(&self) {
        self.synced.store(false, Ordering::Relaxed);
        self.input_level.store(0.0);
        self.output_level.store(0.0);
    }

    /// Neutral values after the pipeline closed.
    pub fn reset(&self) {
        self.reset_levels();
        self.snr_db.store(0.0);
        self.freq_offset_hz.store(0.0);
    }
}

/// Status and live controls of the transmit pipeline.
#[derive(Debug)]
pub struct TxStatus {
    pub running: AtomicBool,
    pub input_level: AtomicF32,
    pub output_level: AtomicF32,
    pub mic_gain: AtomicF32,
    pub tx_scale: AtomicF32,
    pub bpf_enabled: AtomicBool,
    pub spectrum: SpectrumSnapshot,
    callsign: Mutex<String>,
    callsign_dirty: AtomicBool,
}

impl TxStatus {
    pub fn new(spectrum_bins: usize, spectrum_rate: f32, tx_scale: f32) -> Self {
        Self {
            running: AtomicBool::new(false),
            input_level: AtomicF32::new(0.0),
            output_level: AtomicF32::new(0.0),
            mic_gain: AtomicF32::new(1.0),
            tx_scale: AtomicF32::new(tx_scale),
            bpf_enabled: AtomicBool::new(false),
            spectrum: SpectrumSnapshot::new(spectrum_bins, spectrum_rate),
            callsign: Mutex::new(String::new()),
            callsign_dirty: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_callsign(&self, callsign: &str) {
        *lock(&self.callsign) = callsign.to_string();
        self.callsign_dirty.store(true, Ordering::Release);
    }

    pub fn callsign(&self) -> String {
        lock(&self.callsign).clone()
    }

    /// Return the callsign if it changed since the last call.
    pub fn take_callsign_update(&self) -> Option<String> {
        if self.callsign_dirty.swap(false, Ordering::Acquire) {
            Some(self.callsign())
        } else {
            None
        }
    }

    pub fn reset_levels(&self) {
        self.input_level.store(0.0);
        self.output_level.store(0.0);
    }
}
