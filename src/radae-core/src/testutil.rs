// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Scripted collaborators and in-memory streams for pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use num_complex::Complex;

use crate::audio::{AbortHandle, AudioBackend, AudioDevice, AudioError, AudioStream, Direction, ReadStatus};
use crate::engine::{FeatureExtractor, ModemEngine, ModemProvider, RxOutput, SyncTelemetry, Vocoder};
use crate::{DynResult, NB_FEATURES, NB_TOTAL_FEATURES};

pub const N_EOO_BITS: usize = 240;
pub const N_TX_OUT: usize = 960;
pub const N_TX_EOO_OUT: usize = 1152;
pub const TX_SAMPLE: f32 = 0.5;
pub const EOO_SAMPLE: f32 = 0.25;
pub const SYNTH_SAMPLE: f32 = 0.1;

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Everything a scripted engine did, shared with the test body.
#[derive(Default)]
pub struct EngineLog {
    pub rx_calls: AtomicUsize,
    pub tx_calls: AtomicUsize,
    pub eoo_calls: AtomicUsize,
    pub eoo_bits: Mutex<Vec<f32>>,
}

/// Engine driven by a per-call sync script.
///
/// While synced every receive call yields `frames_per_call` feature frames;
/// each frame is filled with its running frame number.
pub struct ScriptedEngine {
    pub nin: usize,
    pub sync_script: Vec<bool>,
    pub frames_per_call: usize,
    pub eoo_at: Option<(usize, Vec<f32>)>,
    /// Size of the feature buffer the engine asks for.
    pub features_in_out: usize,
    /// Feature count reported by `receive` instead of the true one.
    pub reported_features: Option<usize>,
    pub log: Arc<EngineLog>,
    next_frame: usize,
}

impl ScriptedEngine {
    pub fn new(nin: usize, sync_script: Vec<bool>, frames_per_call: usize) -> Self {
        Self {
            nin,
            sync_script,
            frames_per_call,
            eoo_at: None,
            features_in_out: 12 * NB_TOTAL_FEATURES,
            reported_features: None,
            log: Arc::new(EngineLog::default()),
            next_frame: 0,
        }
    }
}

impl ModemEngine for ScriptedEngine {
    fn nin(&self) -> usize {
        self.nin
    }

    fn nin_max(&self) -> usize {
        self.nin
    }

    fn n_features_in_out(&self) -> usize {
        self.features_in_out
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

    fn receive(&mut self, symbols: &[Complex<f32>], features: &mut [f32], eoo_bits: &mut [f32]) -> RxOutput {
        assert_eq!(symbols.len(), self.nin);
        let call = self.log.rx_calls.fetch_add(1, Ordering::SeqCst);
        let synced = match self.sync_script.get(call) {
            Some(&s) => s,
            None => self.sync_script.last().copied().unwrap_or(false),
        };

        let mut n_features = 0;
        if synced {
            for frame in features.chunks_mut(NB_TOTAL_FEATURES).take(self.frames_per_call) {
                frame.fill(self.next_frame as f32);
                self.next_frame += 1;
                n_features += NB_TOTAL_FEATURES;
            }
        }

        let mut eoo = false;
        if let Some((at, payload)) = &self.eoo_at {
            if *at == call {
                eoo_bits[..payload.len()].copy_from_slice(payload);
                eoo = true;
            }
        }

        RxOutput {
            n_features: self.reported_features.filter(|_| synced).unwrap_or(n_features),
            eoo,
            sync: SyncTelemetry {
                synced,
                snr_db: if synced { 12.0 } else { -5.0 },
                freq_offset_hz: if synced { 1.5 } else { 40.0 },
            },
        }
    }

    fn transmit(&mut self, features: &[f32], out: &mut [Complex<f32>]) -> usize {
        assert_eq!(features.len(), self.n_features_in_out());
        self.log.tx_calls.fetch_add(1, Ordering::SeqCst);
        out[..N_TX_OUT].fill(Complex::new(TX_SAMPLE, 0.0));
        N_TX_OUT
    }

    fn transmit_eoo(&mut self, out: &mut [Complex<f32>]) -> usize {
        self.log.eoo_calls.fetch_add(1, Ordering::SeqCst);
        out[..N_TX_EOO_OUT].fill(Complex::new(EOO_SAMPLE, 0.0));
        N_TX_EOO_OUT
    }

    fn set_eoo_bits(&mut self, bits: &[f32]) {
        *self.log.eoo_bits.lock().unwrap() = bits.to_vec();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VocoderEvent {
    Reset,
    /// Frame numbers of the priming frames.
    Prime(Vec<usize>),
    Synth(usize),
}

pub struct RecordingVocoder {
    pub events: Arc<Mutex<Vec<VocoderEvent>>>,
}

impl Vocoder for RecordingVocoder {
    fn reset(&mut self) {
        self.events.lock().unwrap().push(VocoderEvent::Reset);
    }

    fn prime(&mut self, silence: &[f32], frames: &[f32]) {
        assert_eq!(silence.len(), 320);
        assert!(silence.iter().all(|&s| s == 0.0));
        assert_eq!(frames.len(), 5 * NB_FEATURES);
        let ids = frames.chunks(NB_FEATURES).map(|f| f[0] as usize).collect();
        self.events.lock().unwrap().push(VocoderEvent::Prime(ids));
    }

    fn synthesize(&mut self, features: &[f32], pcm: &mut [f32]) {
        self.events
            .lock()
            .unwrap()
            .push(VocoderEvent::Synth(features[0] as usize));
        pcm.fill(SYNTH_SAMPLE);
    }
}

pub struct CountingExtractor {
    pub frames: Arc<AtomicUsize>,
}

impl FeatureExtractor for CountingExtractor {
    fn extract(&mut self, pcm: &[i16], features: &mut [f32]) {
        assert_eq!(pcm.len(), crate::SPEECH_FRAME_SIZE);
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        features.fill(n as f32);
    }
}

pub struct TestProvider {
    engine: Mutex<Option<ScriptedEngine>>,
    pub engine_log: Arc<EngineLog>,
    pub vocoder_events: Arc<Mutex<Vec<VocoderEvent>>>,
    pub extracted: Arc<AtomicUsize>,
}

impl TestProvider {
    pub fn new(engine: ScriptedEngine) -> Self {
        Self {
            engine_log: engine.log.clone(),
            engine: Mutex::new(Some(engine)),
            vocoder_events: Arc::new(Mutex::new(Vec::new())),
            extracted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn vocoder_events(&self) -> Vec<VocoderEvent> {
        self.vocoder_events.lock().unwrap().clone()
    }
}

impl ModemProvider for TestProvider {
    fn open_engine(&self) -> DynResult<Box<dyn ModemEngine>> {
        match self.engine.lock().unwrap().take() {
            Some(engine) => Ok(Box::new(engine)),
            None => Err("scripted engine already taken".into()),
        }
    }

    fn open_vocoder(&self) -> DynResult<Box<dyn Vocoder>> {
        Ok(Box::new(RecordingVocoder {
            events: self.vocoder_events.clone(),
        }))
    }

    fn open_feature_extractor(&self) -> DynResult<Box<dyn FeatureExtractor>> {
        Ok(Box::new(CountingExtractor {
            frames: self.extracted.clone(),
        }))
    }
}

/// Fault a test stream reports on a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Recoverable `AudioError::Stream`; nothing is consumed or recorded.
    Stream,
    /// The read succeeds but reports lost samples.
    Overflow,
    /// `AudioError::Fatal` on this call and every later one.
    Fatal,
}

/// Per-stream fault schedule keyed by call index.
struct FaultScript {
    faults: VecDeque<(usize, Fault)>,
    calls: usize,
    dead: bool,
}

impl FaultScript {
    fn new(mut faults: Vec<(usize, Fault)>) -> Self {
        faults.sort_by_key(|&(at, _)| at);
        Self {
            faults: faults.into(),
            calls: 0,
            dead: false,
        }
    }

    /// Advance one call and return the fault scheduled for it, if any.
    fn next(&mut self) -> Option<Fault> {
        let call = self.calls;
        self.calls += 1;
        if self.dead {
            return Some(Fault::Fatal);
        }
        match self.faults.front() {
            Some(&(at, fault)) if at == call => {
                self.faults.pop_front();
                self.dead = fault == Fault::Fatal;
                Some(fault)
            }
            _ => None,
        }
    }
}

/// Capture stream serving a fixed buffer, then blocking until aborted.
pub struct MemoryCapture {
    data: VecDeque<i16>,
    rate: u32,
    faults: FaultScript,
    aborted: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl AudioStream for MemoryCapture {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadStatus, AudioError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(AudioError::Aborted);
        }
        let fault = self.faults.next();
        match fault {
            Some(Fault::Stream) => return Err(AudioError::Stream("overrun".into())),
            Some(Fault::Fatal) => return Err(AudioError::Fatal("device unplugged".into())),
            _ => {}
        }
        if self.data.len() >= buf.len() {
            let n = buf.len();
            for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
                *dst = src;
            }
            return Ok(if fault == Some(Fault::Overflow) {
                ReadStatus::Overflow
            } else {
                ReadStatus::Ok
            });
        }
        while !self.aborted.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Err(AudioError::Aborted)
    }

    fn write(&mut self, _buf: &[i16]) -> Result<(), AudioError> {
        Err(AudioError::Fatal("capture stream".into()))
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.aborted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {}

    fn drain(&mut self) {}

    fn abort_handle(&self) -> AbortHandle {
        let aborted = self.aborted.clone();
        AbortHandle::new(move || aborted.store(true, Ordering::SeqCst))
    }
}

impl Drop for MemoryCapture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Playback stream recording everything written to it.
pub struct RecordingPlayback {
    rate: u32,
    faults: FaultScript,
    written: Arc<Mutex<Vec<i16>>>,
    drained: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl AudioStream for RecordingPlayback {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read(&mut self, _buf: &mut [i16]) -> Result<ReadStatus, AudioError> {
        Err(AudioError::Fatal("playback stream".into()))
    }

    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(AudioError::Aborted);
        }
        match self.faults.next() {
            Some(Fault::Stream) => return Err(AudioError::Stream("underrun".into())),
            Some(Fault::Fatal) => return Err(AudioError::Fatal("device unplugged".into())),
            _ => {}
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.aborted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {}

    fn drain(&mut self) {
        self.drained.store(true, Ordering::SeqCst);
    }

    fn abort_handle(&self) -> AbortHandle {
        let aborted = self.aborted.clone();
        AbortHandle::new(move || aborted.store(true, Ordering::SeqCst))
    }
}

impl Drop for RecordingPlayback {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend handing out a [`MemoryCapture`] and a [`RecordingPlayback`].
pub struct TestBackend {
    pub capture_data: Vec<i16>,
    /// Rate reported by capture streams; `None` grants the requested rate.
    pub capture_rate: Option<u32>,
    pub playback_rate: Option<u32>,
    pub fail_playback: bool,
    /// Faults injected into capture reads, by read index.
    pub read_faults: Vec<(usize, Fault)>,
    /// Faults injected into playback writes, by write index.
    pub write_faults: Vec<(usize, Fault)>,
    pub written: Arc<Mutex<Vec<i16>>>,
    pub drained: Arc<AtomicBool>,
    pub live_streams: Arc<AtomicUsize>,
}

impl TestBackend {
    pub fn new(capture_data: Vec<i16>) -> Self {
        Self {
            capture_data,
            capture_rate: None,
            playback_rate: None,
            fail_playback: false,
            read_faults: Vec::new(),
            write_faults: Vec::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            drained: Arc::new(AtomicBool::new(false)),
            live_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn written(&self) -> Vec<i16> {
        self.written.lock().unwrap().clone()
    }

    pub fn written_len(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

impl AudioBackend for TestBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn devices(&self, _direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(vec![AudioDevice {
            name: "Test device".into(),
            id: "test".into(),
        }])
    }

    fn open(
        &self,
        device_id: &str,
        direction: Direction,
        channels: u16,
        sample_rate: u32,
        _frames_per_buffer: usize,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        assert_eq!(channels, 1);
        match direction {
            Direction::Capture => {
                self.live_streams.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MemoryCapture {
                    data: self.capture_data.iter().copied().collect(),
                    rate: self.capture_rate.unwrap_or(sample_rate),
                    faults: FaultScript::new(self.read_faults.clone()),
                    aborted: Arc::new(AtomicBool::new(false)),
                    live: self.live_streams.clone(),
                }))
            }
            Direction::Playback if self.fail_playback => Err(AudioError::Open {
                device: device_id.to_string(),
                reason: "busy".into(),
            }),
            Direction::Playback => {
                self.live_streams.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(RecordingPlayback {
                    rate: self.playback_rate.unwrap_or(sample_rate),
                    faults: FaultScript::new(self.write_faults.clone()),
                    written: self.written.clone(),
                    drained: self.drained.clone(),
                    aborted: Arc::new(AtomicBool::new(false)),
                    live: self.live_streams.clone(),
                }))
            }
        }
    }
}
