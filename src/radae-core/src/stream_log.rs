// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{error, warn};

const STREAM_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Rate-limited logger for repeating audio stream errors.
///
/// A new message is logged immediately; repeats of the same message are
/// counted and summarised once the interval has elapsed.
pub struct StreamErrorLogger {
    label: &'static str,
    interval: Duration,
    state: Mutex<StreamErrorState>,
}

#[derive(Default)]
struct StreamErrorState {
    last_error: Option<String>,
    last_logged_at: Option<Instant>,
    suppressed: u64,
}

impl StreamErrorLogger {
    pub fn new(label: &'static str) -> Self {
        Self::with_interval(label, STREAM_ERROR_LOG_INTERVAL)
    }

    pub fn with_interval(label: &'static str, interval: Duration) -> Self {
        Self {
            label,
            interval,
            state: Mutex::new(StreamErrorState::default()),
        }
    }

    /// Log `err` unless it repeats the previous error within the interval.
    /// Returns whether a line was emitted.
    pub fn log(&self, err: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let should_log_now = match (&state.last_error, state.last_logged_at) {
            (Some(prev), Some(ts)) => prev != err || now.duration_since(ts) >= self.interval,
            _ => true,
        };

        if should_log_now {
            if state.suppressed > 0 {
                warn!(
                    "{} repeated {} times: {}",
                    self.label,
                    state.suppressed,
                    state.last_error.as_deref().unwrap_or("<unknown>")
                );
            }
            error!("{}: {}", self.label, err);
            state.last_error = Some(err.to_string());
            state.last_logged_at = Some(now);
            state.suppressed = 0;
        } else {
            state.suppressed += 1;
        }
        should_log_now
    }

    pub fn suppressed(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .suppressed
    }
}
