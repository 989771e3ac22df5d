// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receive pipeline: radio audio in, decoded speech out.
//!
//! capture -> resample to 8 kHz -> Hilbert -> modem receive -> vocoder
//! -> resample to the playback rate -> playback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use num_complex::Complex;
use tracing::{debug, error, info, warn};

use crate::audio::{AbortHandle, AudioBackend, AudioError, AudioStream, Direction, ReadStatus};
use crate::dsp::spectrum::{SpectrumAnalyzer, SPECTRUM_BINS};
use crate::dsp::{f32_to_pcm_rounded, pcm_to_f32, resample_batch, rms, HilbertFilter, StreamingResampler};
use crate::engine::{ModemEngine, ModemProvider, SyncTelemetry, Vocoder};
use crate::eoo::EooCallsignCodec;
use crate::error::PipelineError;
use crate::status::RxStatus;
use crate::stream_log::StreamErrorLogger;
use crate::{MODEM_SAMPLE_RATE, NB_FEATURES, NB_TOTAL_FEATURES, SPEECH_FRAME_SIZE, SPEECH_SAMPLE_RATE};

/// Frames per blocking capture read.
const READ_FRAMES: usize = 512;
/// Feature frames fed to the vocoder on (re)acquisition.
const WARMUP_FRAMES: usize = 5;
/// Zero PCM history handed to the vocoder with the warm-up frames.
const VOCODER_CONT_SAMPLES: usize = 320;
/// Playback prefill in 16 kHz samples (two modem frames of speech).
const PREFILL_SPEECH_SAMPLES: usize = 2 * 12 * SPEECH_FRAME_SIZE;
const OUTPUT_LEVEL_DECAY: f32 = 0.9;
/// Pause before retrying a capture read after a recoverable error.
pub(crate) const READ_RETRY_DELAY: Duration = Duration::from_millis(5);

enum RxSource {
    Device(Box<dyn AudioStream>),
    /// Pre-loaded 8 kHz samples; the thread stops at the end.
    Samples { samples: Vec<f32>, pos: usize },
}

/// Everything the processing thread owns while running.
struct RxState {
    source: RxSource,
    output: Box<dyn AudioStream>,
    engine: Box<dyn ModemEngine>,
    vocoder: Box<dyn Vocoder>,
    codec: EooCallsignCodec,

    in_resampler: StreamingResampler,
    out_resampler: StreamingResampler,
    hilbert: HilbertFilter,
    spectrum: SpectrumAnalyzer,

    capture: Vec<i16>,
    capture_f32: Vec<f32>,
    acc_8k: Vec<f32>,
    symbols: Vec<Complex<f32>>,
    features: Vec<f32>,
    eoo_bits: Vec<f32>,
    warmup: Vec<f32>,
    speech: Vec<f32>,
    out_f32: Vec<f32>,
    out_pcm: Vec<i16>,

    vocoder_ready: bool,
    output_primed: bool,
    was_synced: bool,
    rate_out: u32,
}

impl RxState {
    fn new(
        source: RxSource,
        output: Box<dyn AudioStream>,
        provider: &dyn ModemProvider,
    ) -> Result<Self, PipelineError> {
        let engine = provider
            .open_engine()
            .map_err(|e| PipelineError::Engine(e.to_string()))?;
        let vocoder = provider
            .open_vocoder()
            .map_err(|e| PipelineError::Engine(e.to_string()))?;

        let rate_in = match &source {
            RxSource::Device(stream) => stream.sample_rate(),
            RxSource::Samples { .. } => MODEM_SAMPLE_RATE,
        };
        let rate_out = output.sample_rate();
        if rate_in == 0 || rate_out == 0 {
            return Err(PipelineError::ZeroSampleRate);
        }
        let nin_max = engine.nin_max();

        Ok(Self {
            in_resampler: StreamingResampler::new(rate_in, MODEM_SAMPLE_RATE),
            out_resampler: StreamingResampler::new(SPEECH_SAMPLE_RATE, rate_out),
            hilbert: HilbertFilter::new(),
            spectrum: SpectrumAnalyzer::new(),
            codec: EooCallsignCodec::new(),

            capture: vec![0; READ_FRAMES],
            capture_f32: Vec::with_capacity(READ_FRAMES),
            acc_8k: Vec::with_capacity(nin_max * 2),
            symbols: vec![Complex::new(0.0, 0.0); nin_max],
            features: vec![0.0; engine.n_features_in_out()],
            eoo_bits: vec![0.0; engine.n_eoo_bits()],
            warmup: Vec::with_capacity(WARMUP_FRAMES * NB_TOTAL_FEATURES),
            speech: vec![0.0; SPEECH_FRAME_SIZE],
            out_f32: Vec::with_capacity(SPEECH_FRAME_SIZE * rate_out as usize / SPEECH_SAMPLE_RATE as usize + 4),
            out_pcm: Vec::new(),

            vocoder_ready: false,
            output_primed: false,
            was_synced: false,
            rate_out,

            source,
            output,
            engine,
            vocoder,
        })
    }

    fn abort_handles(&self) -> Vec<AbortHandle> {
        let mut handles = vec![self.output.abort_handle()];
        if let RxSource::Device(stream) = &self.source {
            handles.push(stream.abort_handle());
        }
        handles
    }

    fn restart_streams(&mut self) -> Result<(), AudioError> {
        if let RxSource::Device(stream) = &mut self.source {
            stream.start()?;
        }
        self.output.start()
    }

    fn run(&mut self, status: &RxStatus) {
        let read_errors = StreamErrorLogger::new("Audio input stream error");
        let write_errors = StreamErrorLogger::new("Audio output stream error");

        while status.is_running() {
            let nin = self.engine.nin();
            if nin > self.symbols.len() {
                self.symbols.resize(nin, Complex::new(0.0, 0.0));
            }
            if !self.fill(nin, status, &read_errors) {
                break;
            }

            self.spectrum.update(&self.acc_8k, &status.spectrum);
            status.input_level.store(rms(&self.acc_8k[..nin]));

            self.hilbert
                .process_block(&self.acc_8k[..nin], &mut self.symbols[..nin]);
            self.acc_8k.drain(..nin);

            let out = self.engine.receive(
                &self.symbols[..nin],
                &mut self.features,
                &mut self.eoo_bits,
            );
            self.track_sync(out.sync, status);

            if out.n_features > 0 {
                self.synthesize(out.n_features, status, &write_errors);
            } else {
                let level = status.output_level.load();
                status.output_level.store(level * OUTPUT_LEVEL_DECAY);
            }

            if out.eoo {
                self.decode_callsign(status);
            }
        }
    }

    /// Accumulate at least `nin` samples at 8 kHz. Returns false when the
    /// thread has to stop.
    fn fill(&mut self, nin: usize, status: &RxStatus, read_errors: &StreamErrorLogger) -> bool {
        while self.acc_8k.len() < nin {
            if !status.is_running() {
                return false;
            }
            match &mut self.source {
                RxSource::Samples { samples, pos } => {
                    let remaining = samples.len() - *pos;
                    if remaining == 0 {
                        info!("End of offline samples reached");
                        status.running.store(false, Ordering::Relaxed);
                        return false;
                    }
                    let chunk = (nin - self.acc_8k.len()).min(remaining);
                    self.acc_8k.extend_from_slice(&samples[*pos..*pos + chunk]);
                    *pos += chunk;
                }
                RxSource::Device(stream) => match stream.read(&mut self.capture) {
                    Ok(read) => {
                        if read == ReadStatus::Overflow {
                            read_errors.log("capture overflow, samples lost");
                        }
                        self.capture_f32.clear();
                        pcm_to_f32(&self.capture, &mut self.capture_f32);
                        self.in_resampler
                            .process_into(&self.capture_f32, &mut self.acc_8k);
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
                        error!("Audio input failed, stopping receiver: {}", err);
                        status.running.store(false, Ordering::Relaxed);
                        return false;
                    }
                },
            }
        }
        true
    }

    fn track_sync(&mut self, sync: SyncTelemetry, status: &RxStatus) {
        status.synced.store(sync.synced, Ordering::Relaxed);
        if sync.synced {
            status.snr_db.store(sync.snr_db);
            status.freq_offset_hz.store(sync.freq_offset_hz);
        }

        if sync.synced && !self.was_synced {
            info!(
                "Modem synchronized (SNR {:.1} dB, offset {:.1} Hz)",
                sync.snr_db, sync.freq_offset_hz
            );
        }
        if self.was_synced && !sync.synced {
            info!("Modem lost sync");
            self.vocoder.reset();
            self.vocoder_ready = false;
            self.warmup.clear();
            self.output_primed = false;
        }
        self.was_synced = sync.synced;
    }

    fn synthesize(&mut self, n_features: usize, status: &RxStatus, write_errors: &StreamErrorLogger) {
        let n_frames = n_features.min(self.features.len()) / NB_TOTAL_FEATURES;
        let mut sum2 = 0.0f64;
        let mut count = 0usize;

        for fi in 0..n_frames {
            let frame = &self.features[fi * NB_TOTAL_FEATURES..(fi + 1) * NB_TOTAL_FEATURES];

            if !self.vocoder_ready {
                self.warmup.extend_from_slice(frame);
                if self.warmup.len() >= WARMUP_FRAMES * NB_TOTAL_FEATURES {
                    self.prime_vocoder(status, write_errors);
                }
                continue;
            }

            self.vocoder.synthesize(frame, &mut self.speech);
            sum2 += self.speech.iter().map(|&s| s as f64 * s as f64).sum::<f64>();
            count += SPEECH_FRAME_SIZE;

            self.out_f32.clear();
            self.out_resampler.process_into(&self.speech, &mut self.out_f32);
            self.out_pcm.clear();
            self.out_pcm.extend(
                self.out_f32
                    .iter()
                    .map(|&s| f32_to_pcm_rounded(s, 32768.0)),
            );
            if let Err(err) = self.output.write(&self.out_pcm) {
                if output_failed(err, status, write_errors) {
                    return;
                }
            }
        }

        if count > 0 {
            status.output_level.store((sum2 / count as f64).sqrt() as f32);
        }
    }

    fn prime_vocoder(&mut self, status: &RxStatus, write_errors: &StreamErrorLogger) {
        let mut packed = [0.0f32; WARMUP_FRAMES * NB_FEATURES];
        for (dst, src) in packed
            .chunks_mut(NB_FEATURES)
            .zip(self.warmup.chunks(NB_TOTAL_FEATURES))
        {
            dst.copy_from_slice(&src[..NB_FEATURES]);
        }
        let silence = [0.0f32; VOCODER_CONT_SAMPLES];
        self.vocoder.prime(&silence, &packed);
        self.vocoder_ready = true;
        self.warmup.clear();
        debug!("Vocoder primed");

        if !self.output_primed {
            let prefill = PREFILL_SPEECH_SAMPLES * self.rate_out as usize / SPEECH_SAMPLE_RATE as usize;
            let silence = vec![0i16; prefill];
            if let Err(err) = self.output.write(&silence) {
                output_failed(err, status, write_errors);
            }
            self.output_primed = true;
        }
    }

    fn decode_callsign(&mut self, status: &RxStatus) {
        let sym_count = self.eoo_bits.len() / 2;
        match self.codec.decode(&self.eoo_bits, sym_count) {
            Some(callsign) => {
                info!("End of over from {}", callsign);
                status.set_callsign(callsign);
            }
            None => debug!("End of over without a valid callsign"),
        }
    }
}

/// Report a playback error. Returns true when the thread has to stop.
fn output_failed(err: AudioError, status: &RxStatus, write_errors: &StreamErrorLogger) -> bool {
    match err {
        err if !err.is_fatal() => {
            write_errors.log(&err.to_string());
            false
        }
        AudioError::Aborted => true,
        err => {
            error!("Audio output failed, stopping receiver: {}", err);
            status.running.store(false, Ordering::Relaxed);
            true
        }
    }
}

/// Receive pipeline with its dedicated processing thread.
pub struct RxPipeline {
    backend: Arc<dyn AudioBackend>,
    provider: Arc<dyn ModemProvider>,
    status: Arc<RxStatus>,
    state: Option<RxState>,
    worker: Option<JoinHandle<RxState>>,
    aborts: Vec<AbortHandle>,
}

impl RxPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>, provider: Arc<dyn ModemProvider>) -> Self {
        Self {
            backend,
            provider,
            status: Arc::new(RxStatus::new(SPECTRUM_BINS, MODEM_SAMPLE_RATE as f32)),
            state: None,
            worker: None,
            aborts: Vec::new(),
        }
    }

    /// Open capture and playback devices plus the modem collaborators.
    pub fn open(&mut self, input_id: &str, output_id: &str) -> Result<(), PipelineError> {
        self.close();
        let input = self.backend.open(
            input_id,
            Direction::Capture,
            1,
            MODEM_SAMPLE_RATE,
            READ_FRAMES,
        )?;
        let output = self.open_output(output_id)?;
        let state = RxState::new(RxSource::Device(input), output, self.provider.as_ref())?;
        info!(
            "Receiver opened: capture '{}' at {} Hz, playback '{}' at {} Hz",
            input_id,
            state.in_resampler.rate_in(),
            output_id,
            state.rate_out
        );
        self.state = Some(state);
        Ok(())
    }

    /// Offline mode: demodulate a pre-loaded buffer instead of a capture
    /// device. The thread stops once the buffer is exhausted.
    pub fn open_samples(&mut self, samples: &[f32], sample_rate: u32, output_id: &str) -> Result<(), PipelineError> {
        self.close();
        if sample_rate == 0 {
            return Err(PipelineError::ZeroSampleRate);
        }
        let samples = if sample_rate == MODEM_SAMPLE_RATE {
            samples.to_vec()
        } else {
            resample_batch(samples, sample_rate, MODEM_SAMPLE_RATE)
        };
        if samples.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let output = self.open_output(output_id)?;
        let n = samples.len();
        let state = RxState::new(RxSource::Samples { samples, pos: 0 }, output, self.provider.as_ref())?;
        info!(
            "Receiver opened on {} offline samples, playback '{}' at {} Hz",
            n, output_id, state.rate_out
        );
        self.state = Some(state);
        Ok(())
    }

    fn open_output(&self, output_id: &str) -> Result<Box<dyn AudioStream>, PipelineError> {
        Ok(self.backend.open(
            output_id,
            Direction::Playback,
            1,
            SPEECH_SAMPLE_RATE,
            READ_FRAMES,
        )?)
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

        self.aborts = state.abort_handles();
        self.status.running.store(true, Ordering::Relaxed);
        let status = self.status.clone();
        let spawned = thread::Builder::new()
            .name("radae-rx".into())
            .spawn(move || {
                state.run(&status);
                status.running.store(false, Ordering::Relaxed);
                state
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Receiver started");
                Ok(())
            }
            Err(err) => {
                self.status.running.store(false, Ordering::Relaxed);
                self.aborts.clear();
                Err(err.into())
            }
        }
    }

    /// Stop the processing thread. Pending stream calls are aborted so this
    /// returns promptly.
    pub fn stop(&mut self) {
        self.status.running.store(false, Ordering::Relaxed);
        for handle in self.aborts.drain(..) {
            handle.abort();
        }
        if self.join_worker() {
            info!("Receiver stopped");
        }
        self.status.reset_levels();
    }

    /// Join a finished or stopping worker and take its state back.
    fn join_worker(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        match handle.join() {
            Ok(state) => self.state = Some(state),
            Err(_) => warn!("Receiver thread panicked; pipeline must be reopened"),
        }
        true
    }

    /// Stop and release streams and collaborators.
    pub fn close(&mut self) {
        self.stop();
        if self.state.take().is_some() {
            debug!("Receiver closed");
        }
        self.status.spectrum.clear();
        self.status.reset();
    }

    pub fn status(&self) -> Arc<RxStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_synced(&self) -> bool {
        self.status.synced.load(Ordering::Relaxed)
    }

    pub fn snr_db(&self) -> f32 {
        self.status.snr_db.load()
    }

    pub fn freq_offset_hz(&self) -> f32 {
        self.status.freq_offset_hz.load()
    }

    pub fn input_level(&self) -> f32 {
        self.status.input_level.load()
    }

    pub fn output_level_left(&self) -> f32 {
        self.status.output_level.load()
    }

    /// Mono output: same as the left channel.
    pub fn output_level_right(&self) -> f32 {
        self.status.output_level.load()
    }

    pub fn spectrum(&self) -> Vec<f32> {
        self.status.spectrum.snapshot()
    }

    pub fn spectrum_into(&self, out: &mut [f32]) -> usize {
        self.status.spectrum.copy_into(out)
    }

    pub fn spectrum_bins(&self) -> usize {
        SPECTRUM_BINS
    }

    pub fn spectrum_sample_rate(&self) -> f32 {
        self.status.spectrum.sample_rate()
    }

    pub fn last_callsign(&self) -> Option<String> {
        self.status.last_callsign()
    }
}

impl Drop for RxPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wait_for, Fault, ScriptedEngine, TestBackend, TestProvider, VocoderEvent, N_EOO_BITS};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn pipeline(backend: &Arc<TestBackend>, provider: &Arc<TestProvider>) -> RxPipeline {
        RxPipeline::new(backend.clone(), provider.clone())
    }

    #[test]
    fn silence_never_syncs_and_writes_nothing() {
        // 15 reads of 512 frames feed exactly 8 receive calls of 960.
        let backend = Arc::new(TestBackend::new(vec![0; 8_000]));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(960, vec![false], 0)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || log.rx_calls.load(Ordering::SeqCst) == 8));

        assert!(rx.is_running());
        assert!(!rx.is_synced());
        assert_eq!(rx.output_level_left(), 0.0);
        assert_eq!(rx.input_level(), 0.0);
        assert_eq!(backend.written_len(), 0);
        assert!(provider.vocoder_events().is_empty());
        rx.stop();
        assert!(!rx.is_running());
    }

    #[test]
    fn sync_loss_restarts_warmup() {
        // 7 receive calls of 512 symbols, 4 frames per synced call.
        let script = vec![true, true, true, false, true, true, true];
        let backend = Arc::new(TestBackend::new(vec![0; 7 * 512]));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, script, 4)));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        let prefill = 2 * 12 * 160;
        let expected_len = 2 * prefill + 14 * 160;
        assert!(wait_for(WAIT, || backend.written_len() == expected_len));
        rx.stop();

        let mut expected = vec![VocoderEvent::Prime((0..5).collect())];
        expected.extend((5..12).map(VocoderEvent::Synth));
        expected.push(VocoderEvent::Reset);
        expected.push(VocoderEvent::Prime((12..17).collect()));
        expected.extend((17..24).map(VocoderEvent::Synth));
        assert_eq!(provider.vocoder_events(), expected);

        let written = backend.written();
        assert!(written[..prefill].iter().all(|&s| s == 0));
        // 0.1 * 32768 = 3276.8 rounds up.
        assert!(written[prefill..prefill + 7 * 160].iter().all(|&s| s == 3277));
        assert!(written[prefill + 7 * 160..2 * prefill + 7 * 160].iter().all(|&s| s == 0));
        assert!(written[2 * prefill + 7 * 160..].iter().all(|&s| s == 3277));
    }

    #[test]
    fn telemetry_is_held_while_unsynced() {
        let script = vec![true, false];
        let backend = Arc::new(TestBackend::new(vec![0; 2 * 512]));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, script, 1)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || log.rx_calls.load(Ordering::SeqCst) == 2));
        assert!(wait_for(WAIT, || !rx.is_synced()));
        assert_eq!(rx.snr_db(), 12.0);
        assert_eq!(rx.freq_offset_hz(), 1.5);
        rx.stop();
    }

    #[test]
    fn output_rate_conversion_scales_prefill() {
        let backend = Arc::new(TestBackend {
            playback_rate: Some(48_000),
            ..TestBackend::new(vec![0; 2 * 512])
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![true], 3)));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        // 6 frames: 5 prime, 1 synthesized to 480 samples at 48 kHz.
        let expected = 3 * 2 * 12 * 160 + 480;
        assert!(wait_for(WAIT, || backend.written_len() == expected));
        assert!(wait_for(WAIT, || (rx.output_level_left() - 0.1).abs() < 1e-6));
        assert_eq!(rx.output_level_right(), rx.output_level_left());
        rx.stop();
        assert_eq!(rx.output_level_left(), 0.0);
    }

    #[test]
    fn end_of_over_callsign_is_decoded() {
        let mut engine = ScriptedEngine::new(512, vec![false], 0);
        let payload = EooCallsignCodec::new().encode_to_vec("VK3TPM", N_EOO_BITS);
        engine.eoo_at = Some((1, payload));
        let backend = Arc::new(TestBackend::new(vec![0; 3 * 512]));
        let provider = Arc::new(TestProvider::new(engine));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        assert_eq!(rx.last_callsign(), None);
        rx.start().unwrap();
        assert!(wait_for(WAIT, || rx.last_callsign().is_some()));
        assert_eq!(rx.last_callsign().as_deref(), Some("VK3TPM"));
        rx.stop();
    }

    #[test]
    fn stop_unblocks_pending_read() {
        let backend = Arc::new(TestBackend::new(Vec::new()));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(960, vec![false], 0)));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let t0 = Instant::now();
        rx.stop();
        assert!(t0.elapsed() < Duration::from_millis(200));
        assert!(!rx.is_running());

        // The state came back from the thread, so the pipeline restarts.
        rx.start().unwrap();
        assert!(rx.is_running());
        rx.close();
        assert!(!rx.is_open());
    }

    #[test]
    fn offline_samples_stop_at_end() {
        let backend = Arc::new(TestBackend::new(Vec::new()));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        // 1 s at 16 kHz becomes 8000 samples at 8 kHz: 15 full calls of 512.
        let samples = vec![0.0f32; 16_000];
        rx.open_samples(&samples, 16_000, "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || !rx.is_running()));
        assert_eq!(log.rx_calls.load(Ordering::SeqCst), 15);
        rx.close();
    }

    #[test]
    fn empty_offline_buffer_is_rejected() {
        let backend = Arc::new(TestBackend::new(Vec::new()));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let mut rx = pipeline(&backend, &provider);
        assert!(matches!(
            rx.open_samples(&[0.5], 48_000, "out"),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(rx.start(), Err(PipelineError::NotOpen)));
    }

    #[test]
    fn failed_open_releases_everything() {
        let backend = Arc::new(TestBackend {
            fail_playback: true,
            ..TestBackend::new(Vec::new())
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let mut rx = pipeline(&backend, &provider);

        let err = rx.open("in", "out").unwrap_err();
        assert!(matches!(err, PipelineError::Audio(AudioError::Open { .. })));
        assert_eq!(backend.live_streams.load(Ordering::SeqCst), 0);
        assert!(!rx.is_open());
    }

    #[test]
    fn zero_rate_device_is_refused() {
        let backend = Arc::new(TestBackend {
            playback_rate: Some(0),
            ..TestBackend::new(Vec::new())
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let mut rx = pipeline(&backend, &provider);

        assert!(matches!(rx.open("in", "out"), Err(PipelineError::ZeroSampleRate)));
        assert_eq!(backend.live_streams.load(Ordering::SeqCst), 0);
        assert!(!rx.is_open());
    }

    #[test]
    fn recoverable_capture_faults_are_absorbed() {
        let backend = Arc::new(TestBackend {
            read_faults: vec![(1, Fault::Stream), (2, Fault::Overflow)],
            ..TestBackend::new(vec![0; 2 * 512])
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![true], 3)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        let expected_len = 2 * 12 * 160 + 160;
        assert!(wait_for(WAIT, || backend.written_len() == expected_len));
        assert!(rx.is_running());
        assert!(rx.is_synced());
        assert_eq!(log.rx_calls.load(Ordering::SeqCst), 2);
        rx.stop();

        let expected = vec![VocoderEvent::Prime((0..5).collect()), VocoderEvent::Synth(5)];
        assert_eq!(provider.vocoder_events(), expected);
    }

    #[test]
    fn recoverable_playback_fault_drops_one_block() {
        let backend = Arc::new(TestBackend {
            write_faults: vec![(0, Fault::Stream)],
            ..TestBackend::new(vec![0; 2 * 512])
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![true], 3)));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        // The prefill is lost; the synthesized frame still goes out.
        assert!(wait_for(WAIT, || backend.written_len() == 160));
        assert!(rx.is_running());
        rx.stop();
    }

    #[test]
    fn fatal_capture_error_ends_the_thread() {
        let backend = Arc::new(TestBackend {
            read_faults: vec![(1, Fault::Fatal)],
            ..TestBackend::new(vec![0; 4 * 512])
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || !rx.is_running()));
        assert_eq!(log.rx_calls.load(Ordering::SeqCst), 1);

        rx.stop();
        assert!(!rx.is_running());
        assert!(rx.is_open());
    }

    #[test]
    fn fatal_playback_error_ends_the_thread() {
        let backend = Arc::new(TestBackend {
            write_faults: vec![(0, Fault::Fatal)],
            ..TestBackend::new(vec![0; 4 * 512])
        });
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![true], 6)));
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || !rx.is_running()));
        assert_eq!(backend.written_len(), 0);
        rx.stop();
        assert!(rx.is_open());
    }

    #[test]
    fn over_reported_feature_count_is_clamped() {
        let mut engine = ScriptedEngine::new(512, vec![true], 2);
        engine.features_in_out = 2 * NB_TOTAL_FEATURES;
        engine.reported_features = Some(10 * NB_TOTAL_FEATURES);
        let backend = Arc::new(TestBackend::new(vec![0; 3 * 512]));
        let provider = Arc::new(TestProvider::new(engine));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        rx.start().unwrap();
        assert!(wait_for(WAIT, || log.rx_calls.load(Ordering::SeqCst) == 3));
        assert!(wait_for(WAIT, || backend.written_len() == 2 * 12 * 160 + 160));
        assert!(rx.is_running());
        rx.stop();

        let expected = vec![VocoderEvent::Prime((0..5).collect()), VocoderEvent::Synth(5)];
        assert_eq!(provider.vocoder_events(), expected);
    }

    #[test]
    fn spectrum_tracks_modem_input() {
        let tone: Vec<i16> = (0..4 * 512)
            .map(|t| (8_000.0 * (2.0 * std::f32::consts::PI * 1_000.0 * t as f32 / 8_000.0).sin()) as i16)
            .collect();
        let backend = Arc::new(TestBackend::new(tone));
        let provider = Arc::new(TestProvider::new(ScriptedEngine::new(512, vec![false], 0)));
        let log = provider.engine_log.clone();
        let mut rx = pipeline(&backend, &provider);

        rx.open("in", "out").unwrap();
        assert_eq!(rx.spectrum_bins(), 256);
        assert_eq!(rx.spectrum_sample_rate(), 8_000.0);
        rx.start().unwrap();
        assert!(wait_for(WAIT, || log.rx_calls.load(Ordering::SeqCst) == 4));
        let spectrum = rx.spectrum();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as i32 - 64).abs() <= 1, "peak bin {}", peak);
        assert!(rx.input_level() > 0.1);
        rx.stop();
    }
}
