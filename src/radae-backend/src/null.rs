// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Null audio backend for development and testing.
//!
//! Capture yields silence and playback discards samples, both paced at the
//! requested sample rate so the pipelines run at real-time speed.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use radae_core::{AbortHandle, AudioBackend, AudioDevice, AudioError, AudioStream, Direction, ReadStatus};
use tracing::debug;

const NULL_DEVICE_ID: &str = "null";
/// How far a stream may fall behind wall-clock before pacing restarts.
const MAX_LAG: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn devices(&self, _direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(vec![AudioDevice {
            name: "Null device".to_string(),
            id: NULL_DEVICE_ID.to_string(),
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
        if device_id != NULL_DEVICE_ID && device_id != "default" {
            return Err(AudioError::DeviceNotFound {
                device: device_id.to_string(),
                direction,
            });
        }
        if channels != 1 || sample_rate == 0 {
            return Err(AudioError::Open {
                device: device_id.to_string(),
                reason: format!("unsupported format: {} ch @ {} Hz", channels, sample_rate),
            });
        }
        debug!("Null audio: opened {} stream at {} Hz", direction, sample_rate);
        Ok(Box::new(NullStream::new(direction, sample_rate)))
    }
}

struct Gate {
    aborted: Mutex<bool>,
    wake: Condvar,
}

/// Silence source / sink keeping wall-clock pace.
pub struct NullStream {
    direction: Direction,
    sample_rate: u32,
    next_deadline: Instant,
    gate: Arc<Gate>,
}

impl NullStream {
    fn new(direction: Direction, sample_rate: u32) -> Self {
        Self {
            direction,
            sample_rate,
            next_deadline: Instant::now(),
            gate: Arc::new(Gate {
                aborted: Mutex::new(false),
                wake: Condvar::new(),
            }),
        }
    }

    /// Sleep until `samples` worth of time has passed since the last call.
    fn pace(&mut self, samples: usize) -> Result<(), AudioError> {
        let period = Duration::from_secs_f64(samples as f64 / self.sample_rate as f64);
        let now = Instant::now();
        if self.next_deadline + MAX_LAG < now {
            self.next_deadline = now;
        }
        self.next_deadline += period;

        let mut aborted = self.gate.aborted.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *aborted {
                return Err(AudioError::Aborted);
            }
            let now = Instant::now();
            if now >= self.next_deadline {
                return Ok(());
            }
            aborted = self
                .gate
                .wake
                .wait_timeout(aborted, self.next_deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl AudioStream for NullStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadStatus, AudioError> {
        if self.direction != Direction::Capture {
            return Err(AudioError::Fatal("read on a playback stream".into()));
        }
        self.pace(buf.len())?;
        buf.fill(0);
        Ok(ReadStatus::Ok)
    }

    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError> {
        if self.direction != Direction::Playback {
            return Err(AudioError::Fatal("write on a capture stream".into()));
        }
        self.pace(buf.len())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        *self.gate.aborted.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.next_deadline = Instant::now();
        Ok(())
    }

    fn stop(&mut self) {
        self.next_deadline = Instant::now();
    }

    fn drain(&mut self) {}

    fn abort_handle(&self) -> AbortHandle {
        let gate = self.gate.clone();
        AbortHandle::new(move || {
            *gate.aborted.lock().unwrap_or_else(PoisonError::into_inner) = true;
            gate.wake.notify_all();
        })
    }
}
