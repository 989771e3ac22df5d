// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sound card access through cpal.
//!
//! cpal drives its own callbacks, so every stream is a ring buffer shared
//! between the callback and the blocking `read` / `write` calls. The
//! `cpal::Stream` itself is not `Send` everywhere; it lives on a small owner
//! thread that plays, pauses and finally drops it on request.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use radae_core::dsp::{f32_to_pcm_rounded, PCM_SCALE};
use radae_core::{
    AbortHandle, AudioBackend, AudioDevice, AudioError, AudioStream, Direction, ReadStatus, StreamErrorLogger,
};
use tracing::{debug, error, info, warn};

const DEFAULT_DEVICE_ID: &str = "default";
/// Blocking calls re-check the stream state at least this often.
const WAIT_SLICE: Duration = Duration::from_millis(100);
/// No callback activity for this long is reported as a stream error.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);
/// Ring capacity in device buffers.
const RING_BUFFERS: usize = 8;

pub struct CpalBackend {
    host_name: String,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        Self {
            host_name: host.id().name().to_string(),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".into())
}

fn find_device(host: &cpal::Host, device_id: &str, direction: Direction) -> Result<cpal::Device, AudioError> {
    let not_found = || AudioError::DeviceNotFound {
        device: device_id.to_string(),
        direction,
    };
    if device_id.is_empty() || device_id == DEFAULT_DEVICE_ID {
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        return device.ok_or_else(not_found);
    }

    let devices = match direction {
        Direction::Capture => host.input_devices(),
        Direction::Playback => host.output_devices(),
    }
    .map_err(|e| AudioError::Open {
        device: device_id.to_string(),
        reason: e.to_string(),
    })?;
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == device_id).unwrap_or(false))
        .ok_or_else(not_found)
}

/// Pick a stream configuration as close to the request as the device allows.
///
/// The requested rate is kept when any supported range contains it,
/// otherwise the device default is used. Channels may differ from the
/// request; callers downmix or duplicate.
fn negotiate(
    device: &cpal::Device,
    direction: Direction,
    channels: u16,
    sample_rate: u32,
) -> Result<cpal::StreamConfig, AudioError> {
    let open_err = |reason: String| AudioError::Open {
        device: device_name(device),
        reason,
    };
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Capture => device.supported_input_configs().map(|c| c.collect()),
        Direction::Playback => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| open_err(e.to_string()))?;

    let contains_rate =
        |r: &cpal::SupportedStreamConfigRange| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0;
    let chosen = ranges
        .iter()
        .find(|r| r.channels() == channels && contains_rate(r))
        .or_else(|| ranges.iter().find(|r| contains_rate(r)));

    if let Some(range) = chosen {
        return Ok(cpal::StreamConfig {
            channels: range.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        });
    }

    let fallback = match direction {
        Direction::Capture => device.default_input_config(),
        Direction::Playback => device.default_output_config(),
    }
    .map_err(|e| open_err(e.to_string()))?;
    warn!(
        "Audio {}: {} Hz not supported by '{}', using {} Hz",
        direction,
        sample_rate,
        device_name(device),
        fallback.sample_rate().0
    );
    Ok(fallback.config())
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn devices(&self, direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Capture => host.input_devices(),
            Direction::Playback => host.output_devices(),
        }
        .map_err(|e| AudioError::Open {
            device: self.host_name.clone(),
            reason: e.to_string(),
        })?;

        Ok(devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDevice {
                id: name.clone(),
                name,
            })
            .collect())
    }

    fn open(
        &self,
        device_id: &str,
        direction: Direction,
        channels: u16,
        sample_rate: u32,
        frames_per_buffer: usize,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let mut stream = CpalStream::open(device_id, direction, channels, sample_rate, frames_per_buffer)?;
        stream.start()?;
        Ok(Box::new(stream))
    }
}

struct Ring {
    samples: VecDeque<i16>,
    capacity: usize,
    aborted: bool,
    overflowed: bool,
    failed: Option<String>,
    last_activity: Instant,
}

impl Ring {
    fn check(&self) -> Result<(), AudioError> {
        if self.aborted {
            return Err(AudioError::Aborted);
        }
        if let Some(reason) = &self.failed {
            return Err(AudioError::Fatal(reason.clone()));
        }
        Ok(())
    }

    fn stalled(&self) -> bool {
        self.last_activity.elapsed() >= STALL_TIMEOUT
    }
}

struct Shared {
    ring: Mutex<Ring>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Ring>) -> MutexGuard<'a, Ring> {
        self.ready
            .wait_timeout(guard, WAIT_SLICE)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }
}

enum Control {
    Play,
    Pause,
}

/// Mono 16-bit view of a cpal stream.
pub struct CpalStream {
    direction: Direction,
    sample_rate: u32,
    shared: Arc<Shared>,
    control: Option<mpsc::Sender<Control>>,
    owner: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn open(
        device_id: &str,
        direction: Direction,
        channels: u16,
        sample_rate: u32,
        frames_per_buffer: usize,
    ) -> Result<Self, AudioError> {
        let capacity = (frames_per_buffer.max(1) * RING_BUFFERS).max(sample_rate as usize / 2);
        let shared = Arc::new(Shared {
            ring: Mutex::new(Ring {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                aborted: false,
                overflowed: false,
                failed: None,
                last_activity: Instant::now(),
            }),
            ready: Condvar::new(),
        });

        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, AudioError>>(1);
        let thread_shared = shared.clone();
        let id = device_id.to_string();
        let owner = std::thread::Builder::new()
            .name(format!("cpal-{}", direction))
            .spawn(move || run_owner(id, direction, channels, sample_rate, thread_shared, control_rx, ready_tx))
            .map_err(|e| AudioError::Open {
                device: device_id.to_string(),
                reason: e.to_string(),
            })?;

        let negotiated = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(err)) => {
                let _ = owner.join();
                return Err(err);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(AudioError::Open {
                    device: device_id.to_string(),
                    reason: "stream thread exited".into(),
                });
            }
        };

        Ok(Self {
            direction,
            sample_rate: negotiated,
            shared,
            control: Some(control_tx),
            owner: Some(owner),
        })
    }

    fn send(&self, control: Control) -> Result<(), AudioError> {
        self.control
            .as_ref()
            .and_then(|tx| tx.send(control).ok())
            .ok_or_else(|| AudioError::Fatal("stream thread exited".into()))
    }
}

/// Owns the cpal stream for its whole life.
fn run_owner(
    device_id: String,
    direction: Direction,
    channels: u16,
    sample_rate: u32,
    shared: Arc<Shared>,
    control: mpsc::Receiver<Control>,
    ready: mpsc::SyncSender<Result<u32, AudioError>>,
) {
    let stream = match build_stream(&device_id, direction, channels, sample_rate, shared.clone()) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    while let Ok(cmd) = control.recv() {
        let result = match cmd {
            Control::Play => stream.play().map_err(|e| e.to_string()),
            Control::Pause => stream.pause().map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            error!("Audio {} stream control failed: {}", direction, e);
            shared.lock().failed = Some(e);
            shared.ready.notify_all();
        }
    }
    debug!("Audio {} stream closed", direction);
}

fn build_stream(
    device_id: &str,
    direction: Direction,
    channels: u16,
    sample_rate: u32,
    shared: Arc<Shared>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_id, direction)?;
    let config = negotiate(&device, direction, channels, sample_rate)?;
    let device_channels = config.channels.max(1) as usize;
    let rate = config.sample_rate.0;

    info!(
        "Audio {}: using device '{}' ({}Hz, {} ch)",
        direction,
        device_name(&device),
        rate,
        device_channels
    );

    let err_logger = Arc::new(StreamErrorLogger::new(match direction {
        Direction::Capture => "Audio input stream error",
        Direction::Playback => "Audio output stream error",
    }));
    let err_shared = shared.clone();
    let on_error = move |err: cpal::StreamError| {
        err_logger.log(&err.to_string());
        if let cpal::StreamError::DeviceNotAvailable = err {
            err_shared.lock().failed = Some(err.to_string());
            err_shared.ready.notify_all();
        }
    };

    let built = match direction {
        Direction::Capture => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut ring = shared.lock();
                for frame in data.chunks(device_channels) {
                    if ring.samples.len() >= ring.capacity {
                        ring.samples.pop_front();
                        ring.overflowed = true;
                    }
                    ring.samples.push_back(f32_to_i16(frame[0]));
                }
                ring.last_activity = Instant::now();
                drop(ring);
                shared.ready.notify_all();
            },
            on_error,
            None,
        ),
        Direction::Playback => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut ring = shared.lock();
                for frame in data.chunks_mut(device_channels) {
                    let sample = ring.samples.pop_front().map(i16_to_f32).unwrap_or(0.0);
                    frame.fill(sample);
                }
                ring.last_activity = Instant::now();
                drop(ring);
                shared.ready.notify_all();
            },
            on_error,
            None,
        ),
    };

    let stream = built.map_err(|e| AudioError::Open {
        device: device_name(&device),
        reason: e.to_string(),
    })?;
    Ok((stream, rate))
}

fn f32_to_i16(x: f32) -> i16 {
    f32_to_pcm_rounded(x, PCM_SCALE)
}

fn i16_to_f32(x: i16) -> f32 {
    x as f32 / PCM_SCALE
}

impl AudioStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadStatus, AudioError> {
        if self.direction != Direction::Capture {
            return Err(AudioError::Fatal("read on a playback stream".into()));
        }
        let mut ring = self.shared.lock();
        loop {
            ring.check()?;
            if ring.samples.len() >= buf.len() {
                break;
            }
            if ring.stalled() {
                ring.last_activity = Instant::now();
                return Err(AudioError::Stream("capture stalled".into()));
            }
            ring = self.shared.wait(ring);
        }

        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(ring.samples.drain(..n)) {
            *dst = src;
        }
        if std::mem::take(&mut ring.overflowed) {
            Ok(ReadStatus::Overflow)
        } else {
            Ok(ReadStatus::Ok)
        }
    }

    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError> {
        if self.direction != Direction::Playback {
            return Err(AudioError::Fatal("write on a capture stream".into()));
        }
        let mut remaining = buf;
        let mut ring = self.shared.lock();
        while !remaining.is_empty() {
            ring.check()?;
            let free = ring.capacity - ring.samples.len();
            if free == 0 {
                if ring.stalled() {
                    ring.last_activity = Instant::now();
                    return Err(AudioError::Stream("playback stalled".into()));
                }
                ring = self.shared.wait(ring);
                continue;
            }
            let n = free.min(remaining.len());
            ring.samples.extend(&remaining[..n]);
            remaining = &remaining[n..];
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        {
            let mut ring = self.shared.lock();
            ring.aborted = false;
            ring.overflowed = false;
            ring.samples.clear();
            ring.last_activity = Instant::now();
        }
        self.send(Control::Play)
    }

    fn stop(&mut self) {
        if self.send(Control::Pause).is_err() {
            warn!("Audio {} stream already closed", self.direction);
        }
        self.shared.lock().samples.clear();
    }

    fn drain(&mut self) {
        let mut ring = self.shared.lock();
        let queued = ring.samples.len() as f64 / self.sample_rate.max(1) as f64;
        let deadline = Instant::now() + Duration::from_secs_f64(queued) + STALL_TIMEOUT;
        while !ring.samples.is_empty() && ring.check().is_ok() && Instant::now() < deadline {
            ring = self.shared.wait(ring);
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        let shared = self.shared.clone();
        AbortHandle::new(move || {
            shared.lock().aborted = true;
            shared.ready.notify_all();
        })
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        // Dropping the sender ends the owner loop, which drops the stream.
        self.control.take();
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}
