// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transmit pipeline: microphone in, modem signal out.
//!
//! capture -> resample to 16 kHz -> feature extraction -> modem transmit
//! -> optional band-pass -> resample to the playback rate -> playback.
//! Stopping sends one end-of-over frame carrying the callsign.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use num_complex::Complex;
use tracing::{debug, error, info, warn};

use crate::audio::{AbortHandle, AudioBackend, AudioError, AudioStream, Direction, ReadStatus};
use crate::dsp::spectrum::{SpectrumAnalyzer, FFT_SIZE, SPECTRUM_BINS};
use crate::dsp::{f32_to_pcm_truncated, pcm_to_f32, rms, BandPassFilter, StreamingResampler};
use crate::engine::{FeatureExtractor, ModemEngine, ModemProvider};
use crate::eoo::EooCallsignCodec;
use crate::error::PipelineError;
use crate::rx::READ_RETRY_DELAY;
use crate::status::TxStatus;
use crate::stream_log::StreamErrorLogger;
use crate::{MODEM_SAMPLE_RATE, NB_TOTAL_FEATURES, SPEECH_FRAME_SIZE, SPEECH_SAMPLE_RATE};

/// Frames per blocking capture read.
const READ_FRAMES: usize = 160;
/// Device buffer size requested from the backend.
const DEVICE_BUFFER_FRAMES: usize = 512;
/// Output scale for a moderate drive level with headroom.
pub const DEFAULT_TX_SCALE: f32 = 16_384.0;
/// How long `stop` lets the end-of-over frame flush before aborting playback.
const EOO_FLUSH_GRACE: Duration = Duration::from_secs(1);

struct TxState {
    input: Box<dyn AudioStream>,
    output: Box<dyn AudioStream>,
    engine: Box<dyn ModemEngine>,
    extractor: Box<dyn FeatureExtractor>,
    codec: EooCallsignCodec,

    in_resampler: StreamingResampler,
    out_resampler: StreamingResampler,
    bpf: BandPassFilter,
    spectrum: SpectrumAnalyzer,

    capture: Vec<i16>,
    capture_f32: Vec<f32>,
    acc_16k: Vec<f32>,
    frame_pcm: Vec<i16>,
    frame_features: Vec<f32>,
    features: Vec<f32>,
    feat_count: usize,
    frames_per_modem: usize,
    tx_out: Vec<Complex<f32>>,
    eoo_out: Vec<Complex<f32>>,
    eoo_bits: Vec<f32>,
    real_8k: Vec<f32>,
    out_f32: Vec<f32>,
    out_pcm: Vec<i16>,

    rate_out: u32,
    write_errors: StreamErrorLogger,
}

impl TxState {
    fn new(
        input: Box<dyn AudioStream>,
        output: Box<dyn AudioStream>,
        provider: &dyn ModemProvider,
        status: &TxStatus,
    ) -> Result<Self, PipelineError> {
        let engine = provider
            .open_engine()
            .map_err(|e| PipelineError::Engine(e.to_string()))?;
        let extractor = provider
            .open_feature_extractor()
            .map_err(|e| PipelineError::Engine(e.to_string()))?;

        let n_features_in = engine.n_features_in_out();
        if n_features_in < NB_TOTAL_FEATURES {
            return Err(PipelineError::Engine(format!(
                "engine takes {} features per modem frame, need at least {}",
                n_features_in, NB_TOTAL_FEATURES
            )));
        }
        let rate_in = input.sample_rate();
        let rate_out = output.sample_rate();
        if rate_in == 0 || rate_out == 0 {
            return Err(PipelineError::ZeroSampleRate);
        }

        let mut state = Self {
            in_resampler: StreamingResampler::new(rate_in, SPEECH_SAMPLE_RATE),
            out_resampler: StreamingResampler::new(MODEM_SAMPLE_RATE, rate_out),
            bpf: BandPassFilter::modem_default(),
            spectrum: SpectrumAnalyzer::new(),
            codec: EooCallsignCodec::new(),

            capture: vec![0; READ_FRAMES],
            capture_f32: Vec::with_capacity(READ_FRAMES),
            acc_16k: Vec::with_capacity(1024),
            frame_pcm: vec![0; SPEECH_FRAME_SIZE],
            frame_features: vec![0.0; NB_TOTAL_FEATURES],
            features: vec![0.0; n_features_in],
            feat_count: 0,
            frames_per_modem: n_features_in / NB_TOTAL_FEATURES,
            tx_out: vec![Complex::new(0.0, 0.0); engine.n_tx_out()],
            eoo_out: vec![Complex::new(0.0, 0.0); engine.n_tx_eoo_out()],
            eoo_bits: vec![0.0; engine.n_eoo_bits()],
            real_8k: Vec::new(),
            out_f32: Vec::new(),
            out_pcm: Vec::new(),

            rate_out,
            write_errors: StreamErrorLogger::new("Audio output stream error"),

            input,
            output,
            engine,
            extractor,
        };

        let callsign = status.callsign();
        if !callsign.is_empty() {
            state.install_callsign(&callsign);
        }
        Ok(state)
    }

    fn abort_handles(&self) -> (AbortHandle, AbortHandle) {
        (self.input.abort_handle(), self.output.abort_handle())
    }

    fn restart_streams(&mut self) -> Result<(), AudioError> {
        self.input.start()?;
        self.output.start()
    }

    fn install_callsign(&mut self, callsign: &str) {
        self.codec.encode(callsign, &mut self.eoo_bits);
        self.engine.set_eoo_bits(&self.eoo_bits);
        debug!("End-of-over callsign set to '{}'", callsign);
    }

    fn apply_callsign_update(&mut self, status: &TxStatus) {
        if let Some(callsign) = status.take_callsign_update() {
            self.install_callsign(&callsign);
        }
    }

    fn run(&mut self, status: &TxStatus) {
        let read_errors = StreamErrorLogger::new("Audio input stream error");
        self.apply_callsign_update(status);

        // Two modem frames of headroom for the bursty write pattern.
        let prefill = 2 * self.tx_out.len() * self.rate_out as usize / MODEM_SAMPLE_RATE as usize;
        if let Err(err) = self.output.write(&vec![0i16; prefill]) {
            self.write_errors.log(&err.to_string());
        }

        while status.is_running() {
            if !self.fill(status, &read_errors) {
                break;
            }
            while self.acc_16k.len() >= SPEECH_FRAME_SIZE {
                self.encode_frame(status);
            }
            self.apply_callsign_update(status);
        }
    }

    /// Accumulate one speech frame at 16 kHz. Returns false when the
    /// thread has to stop.
    fn fill(&mut self, status: &TxStatus, read_errors: &StreamErrorLogger) -> bool {
        while self.acc_16k.len() < SPEECH_FRAME_SIZE {
            if !status.is_running() {
                return false;
            }
            match self.input.read(&mut self.capture) {
                Ok(read) => {
                    if read == ReadStatus::Overflow {
                        read_errors.log("microphone overflow, samples lost");
                    }
                    self.capture_f32.clear();
                    pcm_to_f32(&self.capture, &mut self.capture_f32);
                    let start = self.acc_16k.len();
                    self.in_resampler
                        .process_into(&self.capture_f32, &mut self.acc_16k);
                    let gain = status.mic_gain.load();
                    for s in &mut self.acc_16k[start..] {
                        *s *= gain;
                    }
                }
                Err(err) if !err.is_fatal() => {
                    read_errors.log(&err.to_string());
                    thread::sleep(READ_RETRY_DELAY);
                }
                Err(AudioError::Aborted) => {
                    debug!("Audio input aborted");
                    return false;
                }
                Err(err) => {
                    error!("Audio input failed, stopping transmitter: {}", err);
                    status.running.store(false, Ordering::Relaxed);
                    return false;
                }
            }
        }
        true
    }

    fn encode_frame(&mut self, status: &TxStatus) {
        let frame = &self.acc_16k[..SPEECH_FRAME_SIZE];
        status.input_level.store(rms(frame));
        for (dst, &s) in self.frame_pcm.iter_mut().zip(frame) {
            *dst = f32_to_pcm_truncated(s, 32768.0);
        }
        self.acc_16k.drain(..SPEECH_FRAME_SIZE);

        self.extractor
            .extract(&self.frame_pcm, &mut self.frame_features);
        let offset = self.feat_count * NB_TOTAL_FEATURES;
        self.features[offset..offset + NB_TOTAL_FEATURES].copy_from_slice(&self.frame_features);
        self.feat_count += 1;

        if self.feat_count >= self.frames_per_modem {
            let n = self.engine.transmit(&self.features, &mut self.tx_out);
            self.write_modem(n, false, status);
            self.feat_count = 0;
        }
    }

    /// Send the real part of `n` symbols from the transmit (or end-of-over)
    /// buffer to playback.
    fn write_modem(&mut self, n: usize, eoo: bool, status: &TxStatus) {
        let symbols = if eoo { &self.eoo_out } else { &self.tx_out };
        let symbols = &symbols[..n.min(symbols.len())];
        self.real_8k.clear();
        self.real_8k.extend(symbols.iter().map(|c| c.re));

        if status.bpf_enabled.load(Ordering::Relaxed) {
            self.bpf.process_block(&mut self.real_8k);
        }
        status.output_level.store(rms(&self.real_8k));
        if self.real_8k.len() >= FFT_SIZE {
            self.spectrum.update(&self.real_8k, &status.spectrum);
        }

        self.out_f32.clear();
        self.out_resampler.process_into(&self.real_8k, &mut self.out_f32);
        let scale = status.tx_scale.load();
        self.out_pcm.clear();
        self.out_pcm
            .extend(self.out_f32.iter().map(|&s| f32_to_pcm_truncated(s, scale)));

        match self.output.write(&self.out_pcm) {
            Ok(()) => {}
            Err(AudioError::Aborted) => debug!("Audio output aborted"),
            Err(err) if !err.is_fatal() => {
                self.write_errors.log(&err.to_string());
            }
            Err(err) => {
                error!("Audio output failed, stopping transmitter: {}", err);
                status.running.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Generate the end-of-over frame, write it and wait for playback.
    fn send_end_of_over(&mut self, status: &TxStatus) {
        self.apply_callsign_update(status);
        let n = self.engine.transmit_eoo(&mut self.eoo_out);
        self.write_modem(n, true, status);
        self.output.drain();
        info!("End of over sent");
    }
}

/// Transmit pipeline with its dedicated processing thread.
pub struct TxPipeline {
    backend: Arc<dyn AudioBackend>,
    provider: Arc<dyn ModemProvider>,
    status: Arc<TxStatus>,
    state: Option<TxState>,
    worker: Option<JoinHandle<TxState>>,
    aborts: Option<(AbortHandle, AbortHandle)>,
}

impl TxPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>, provider: Arc<dyn ModemProvider>) -> Self {
        Self {
            backend,
            provider,
            status: Arc::new(TxStatus::new(
                SPECTRUM_BINS,
                MODEM_SAMPLE_RATE as f32,
                DEFAULT_TX_SCALE,
            )),
            state: None,
            worker: None,
            aborts: None,
        }
    }

    /// Open microphone capture, radio playback and the modem collaborators.
    pub fn open(&mut self, mic_id: &str, radio_id: &str) -> Result<(), PipelineError> {
        self.close();
        let input = self.backend.open(
            mic_id,
            Direction::Capture,
            1,
            SPEECH_SAMPLE_RATE,
            DEVICE_BUFFER_FRAMES,
        )?;
        let output = self.backend.open(
            radio_id,
            Direction::Playback,
            1,
            MODEM_SAMPLE_RATE,
            DEVICE_BUFFER_FRAMES,
        )?;
        let state = TxState::new(input, output, self.provider.as_ref(), &self.status)?;
        info!(
            "Transmitter opened: microphone '{}' at {} Hz, radio '{}' at {} Hz",
            mic_id,
            state.in_resampler.rate_in(),
            radio_id,
            state.rate_out
        );
        self.state = Some(state);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some() || self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.status.is_running() {
            return Ok(());
        }
        self.join_worker();
        let mut state = self.state.take().ok_or(PipelineError::NotOpen)?;
        if let Err(err) = state.restart_streams() {
            self.state = Some(state);
            return Err(err.into());
        }

        self.aborts = Some(state.abort_handles());
        self.status.running.store(true, Ordering::Relaxed);
        let status = self.status.clone();
        let spawned = thread::Builder::new()
            .name("radae-tx".into())
            .spawn(move || {
                state.run(&status);
                state.send_end_of_over(&status);
                status.running.store(false, Ordering::Relaxed);
                state
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Transmitter started");
                Ok(())
            }
            Err(err) => {
                self.status.running.store(false, Ordering::Relaxed);
                self.aborts = None;
                Err(err.into())
            }
        }
    }

    /// Stop transmitting. Capture is aborted at once; playback gets a grace
    /// period to flush the end-of-over frame before it is aborted as well.
    pub fn stop(&mut self) {
        self.status.running.store(false, Ordering::Relaxed);
        if let Some((input_abort, output_abort)) = self.aborts.take() {
            input_abort.abort();
            if let Some(handle) = &self.worker {
                let deadline = Instant::now() + EOO_FLUSH_GRACE;
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                if !handle.is_finished() {
                    warn!("End-of-over flush timed out, aborting playback");
                    output_abort.abort();
                }
            }
        }
        if self.join_worker() {
            info!("Transmitter stopped");
        }
        self.status.reset_levels();
    }

    fn join_worker(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        match handle.join() {
            Ok(state) => self.state = Some(state),
            Err(_) => warn!("Transmitter thread panicked; pipeline must be reopened"),
        }
        true
    }

    pub fn close(&mut self) {
        self.stop();
        if self.state.take().is_some() {
            debug!("Transmitter closed");
        }
        self.status.spectrum.clear();
    }

    pub fn status(&self) -> Arc<TxStatus> {
        self.status.clone()
    }

    pub fn set_mic_gain(&self, gain: f32) {
        self.status.mic_gain.store(gain);
    }

    pub fn mic_gain(&self) -> f32 {
        self.status.mic_gain.load()
    }

    pub fn set_tx_scale(&self, scale: f32) {
        self.status.tx_scale.store(scale);
    }

    pub fn tx_scale(&self) -> f32 {
        self.status.tx_scale.load()
    }

    pub fn set_bpf_enabled(&self, enabled: bool) {
        self.status.bpf_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn bpf_enabled(&self) -> bool {
        self.status.bpf_enabled.load(Ordering::Relaxed)
    }

    /// Callsign carried by the next end-of-over frame.
    pub fn set_callsign(&self, callsign: &str) {
        self.status.set_callsign(callsign);
    }

    pub fn callsign(&self) -> String {
        self.status.callsign()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn input_level(&self) -> f32 {
        self.status.input_level.load()
    }

    pub fn output_level(&self) -> f32 {
        self.status.output_level.load()
    }

    pub fn spectrum(&self) -> Vec<f32> {
        self.status.spectrum.snapshot()
    }

    pub fn spectrum_into(&self, out: &mut [f32]) -> usize {
        self.status.spectrum.copy_into(out)
    }

    pub fn spectrum_sample_rate(&self) -> f32 {
        self.status.spectrum.sample_rate()
    }
}

impl Drop for TxPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
