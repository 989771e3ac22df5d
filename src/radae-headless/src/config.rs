// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for radae-headless.
//!
//! Config is loaded from the `[radae-headless]` section of `radae.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./radae.toml`
//! 3. `~/.config/radae/radae.toml`
//! 4. `/etc/radae/radae.toml`

use serde::{Deserialize, Serialize};

use radae_app::ConfigFile;
use radae_core::tx::DEFAULT_TX_SCALE;

/// Top-level headless configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub general: GeneralConfig,
    pub audio: AudioConfig,
    pub tx: TxConfig,
    pub engine: EngineConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Callsign sent in the end-of-over frame
    pub callsign: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Audio backend and device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio backend name (e.g. "cpal", "null")
    pub backend: String,
    /// Capture device carrying the radio receiver audio
    pub from_radio: String,
    /// Playback device feeding the radio transmitter
    pub to_radio: String,
    /// Microphone capture device
    pub from_mic: String,
    /// Speaker playback device
    pub to_speaker: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: default_backend().to_string(),
            from_radio: "default".to_string(),
            to_radio: "default".to_string(),
            from_mic: "default".to_string(),
            to_speaker: "default".to_string(),
        }
    }
}

fn default_backend() -> &'static str {
    if cfg!(feature = "cpal") {
        "cpal"
    } else {
        "null"
    }
}

/// Transmitter controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Linear microphone gain applied before feature extraction
    pub mic_gain: f32,
    /// Peak output amplitude in 16-bit sample units
    pub tx_scale: f32,
    /// Band-pass filter the modem signal before playback
    pub bpf: bool,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            mic_gain: 1.0,
            tx_scale: DEFAULT_TX_SCALE,
            bpf: false,
        }
    }
}

/// Modem engine selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name (e.g. "dummy")
    pub name: String,
    /// Model weights path, for engines that load one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "dummy".to_string(),
            model: None,
        }
    }
}

impl HeadlessConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.audio.backend.trim().is_empty() {
            return Err("[audio].backend must not be empty".to_string());
        }
        if self.engine.name.trim().is_empty() {
            return Err("[engine].name must not be empty".to_string());
        }

        if !self.tx.mic_gain.is_finite() || self.tx.mic_gain < 0.0 || self.tx.mic_gain > 100.0 {
            return Err("[tx].mic_gain must be in range 0..=100".to_string());
        }
        if !self.tx.tx_scale.is_finite() || self.tx.tx_scale <= 0.0 || self.tx.tx_scale > 32767.0 {
            return Err("[tx].tx_scale must be in range (0, 32767]".to_string());
        }

        if let Some(callsign) = self.general.callsign.as_deref() {
            if callsign.chars().count() > radae_core::eoo::MAX_CALLSIGN_LEN {
                return Err(format!(
                    "[general].callsign '{}' is longer than {} characters",
                    callsign,
                    radae_core::eoo::MAX_CALLSIGN_LEN
                ));
            }
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the
    /// `[radae-headless]` section header.
    pub fn example_toml() -> String {
        let example = HeadlessConfig {
            general: GeneralConfig {
                callsign: Some("N0CALL".to_string()),
                log_level: Some("info".to_string()),
            },
            ..HeadlessConfig::default()
        };
        example.to_toml_string().unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for HeadlessConfig {
    fn section_key() -> &'static str {
        "radae-headless"
    }
}
