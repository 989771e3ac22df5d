// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use radae_app::config::config_search_paths;
use radae_app::{init_logging, ConfigFile};
use radae_backend::{register_builtin_backends_on, RegistrationContext};
use radae_core::{AudioBackend, Direction, DynResult, RxPipeline, TxPipeline};

use config::HeadlessConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - RADAE digital voice modem");
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Transmit (microphone to radio) instead of receive
    #[arg(short = 't', long = "transmit")]
    transmit: bool,
    /// List audio devices and exit
    #[arg(short = 'd', long = "devices")]
    devices: bool,
    /// Capture device carrying the radio receiver audio
    #[arg(long = "fromradio", value_name = "DEVICE")]
    from_radio: Option<String>,
    /// Playback device feeding the radio transmitter
    #[arg(long = "toradio", value_name = "DEVICE")]
    to_radio: Option<String>,
    /// Microphone capture device
    #[arg(long = "frommic", value_name = "DEVICE")]
    from_mic: Option<String>,
    /// Speaker playback device
    #[arg(long = "tospeaker", value_name = "DEVICE")]
    to_speaker: Option<String>,
    /// Callsign sent in the end-of-over frame
    #[arg(long = "call")]
    callsign: Option<String>,
    /// Audio backend to use (e.g. cpal, null)
    #[arg(long = "backend")]
    backend: Option<String>,
    /// Modem engine to use (e.g. dummy)
    #[arg(long = "engine")]
    engine: Option<String>,
}

impl Cli {
    fn has_overrides(&self) -> bool {
        self.from_radio.is_some()
            || self.to_radio.is_some()
            || self.from_mic.is_some()
            || self.to_speaker.is_some()
            || self.callsign.is_some()
            || self.backend.is_some()
            || self.engine.is_some()
    }

    /// Merge CLI arguments over the file configuration.
    fn apply_to(&self, cfg: &mut HeadlessConfig) {
        let overrides = [
            (&self.from_radio, &mut cfg.audio.from_radio),
            (&self.to_radio, &mut cfg.audio.to_radio),
            (&self.from_mic, &mut cfg.audio.from_mic),
            (&self.to_speaker, &mut cfg.audio.to_speaker),
            (&self.backend, &mut cfg.audio.backend),
            (&self.engine, &mut cfg.engine.name),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        if let Some(ref callsign) = self.callsign {
            cfg.general.callsign = Some(callsign.clone());
        }
    }
}

/// Load the config file, or start from defaults when none exists.
///
/// Returns the config and the path it was loaded from. The last item is
/// where a fresh config may be written when nothing was found on disk.
fn load_config(cli: &Cli) -> DynResult<(HeadlessConfig, Option<PathBuf>, Option<PathBuf>)> {
    match cli.config {
        Some(ref path) if path.exists() => Ok((HeadlessConfig::load_from_file(path)?, Some(path.clone()), None)),
        Some(ref path) => Ok((HeadlessConfig::default(), None, Some(path.clone()))),
        None => {
            let (cfg, found) = HeadlessConfig::load_from_default_paths()?;
            let create_at = match found {
                Some(_) => None,
                None => config_search_paths().into_iter().nth(1),
            };
            Ok((cfg, found, create_at))
        }
    }
}

fn list_devices(backend: &dyn AudioBackend) -> DynResult<()> {
    for direction in [Direction::Capture, Direction::Playback] {
        println!("{} devices ({}):", direction, backend.name());
        for device in backend.devices(direction)? {
            if device.id == device.name {
                println!("  {}", device.name);
            } else {
                println!("  {} [{}]", device.name, device.id);
            }
        }
    }
    Ok(())
}

enum Pipeline {
    Rx(RxPipeline),
    Tx(TxPipeline),
}

impl Pipeline {
    fn is_running(&self) -> bool {
        match self {
            Pipeline::Rx(rx) => rx.is_running(),
            Pipeline::Tx(tx) => tx.is_running(),
        }
    }

    fn stop(&mut self) {
        match self {
            Pipeline::Rx(rx) => rx.stop(),
            Pipeline::Tx(tx) => tx.stop(),
        }
    }
}

fn start_pipeline(
    cfg: &HeadlessConfig,
    transmit: bool,
    backend: Arc<dyn AudioBackend>,
    registry: &RegistrationContext,
) -> DynResult<Pipeline> {
    let provider = registry.build_engine(&cfg.engine.name, cfg.engine.model.as_deref())?;

    if transmit {
        let mut tx = TxPipeline::new(backend, provider);
        tx.set_mic_gain(cfg.tx.mic_gain);
        tx.set_tx_scale(cfg.tx.tx_scale);
        tx.set_bpf_enabled(cfg.tx.bpf);
        if let Some(ref callsign) = cfg.general.callsign {
            tx.set_callsign(callsign);
        }
        tx.open(&cfg.audio.from_mic, &cfg.audio.to_radio)?;
        tx.start()?;
        info!(
            "Transmitting: '{}' -> '{}' (gain {:.2}, scale {:.0}, bpf {})",
            cfg.audio.from_mic, cfg.audio.to_radio, cfg.tx.mic_gain, cfg.tx.tx_scale, cfg.tx.bpf
        );
        Ok(Pipeline::Tx(tx))
    } else {
        let mut rx = RxPipeline::new(backend, provider);
        rx.open(&cfg.audio.from_radio, &cfg.audio.to_speaker)?;
        rx.start()?;
        info!(
            "Receiving: '{}' -> '{}'",
            cfg.audio.from_radio, cfg.audio.to_speaker
        );
        Ok(Pipeline::Rx(rx))
    }
}

/// Log one status line; returns the callsign last reported.
fn report_status(pipeline: &Pipeline, last_callsign: Option<String>) -> Option<String> {
    match pipeline {
        Pipeline::Rx(rx) => {
            if rx.is_synced() {
                info!(
                    "sync: yes  snr: {:5.1} dB  foff: {:+6.1} Hz  in: {:.3}  out: {:.3}",
                    rx.snr_db(),
                    rx.freq_offset_hz(),
                    rx.input_level(),
                    rx.output_level_left()
                );
            } else {
                info!("sync: no   in: {:.3}", rx.input_level());
            }
            let callsign = rx.last_callsign();
            if callsign.is_some() && callsign != last_callsign {
                info!("End of over from {}", callsign.as_deref().unwrap_or_default());
            }
            callsign
        }
        Pipeline::Tx(tx) => {
            info!(
                "tx  mic: {:.3}  out: {:.3}",
                tx.input_level(),
                tx.output_level()
            );
            last_callsign
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", HeadlessConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path, create_at) = load_config(&cli)?;
    cli.apply_to(&mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid radae-headless configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }
    if let Some(path) = create_at.filter(|_| cli.has_overrides()) {
        match cfg.save_to_file(&path) {
            Ok(()) => info!("Saved configuration to {}", path.display()),
            Err(e) => warn!("{}", e),
        }
    }

    if !registry.is_audio_backend_registered(&cfg.audio.backend) {
        return Err(format!(
            "Unknown audio backend: {} (available: {})",
            cfg.audio.backend,
            registry.registered_audio_backends().join(", ")
        )
        .into());
    }
    if !registry.is_engine_registered(&cfg.engine.name) {
        return Err(format!(
            "Unknown modem engine: {} (available: {})",
            cfg.engine.name,
            registry.registered_engines().join(", ")
        )
        .into());
    }

    let backend = registry.build_audio_backend(&cfg.audio.backend)?;
    if cli.devices {
        return list_devices(backend.as_ref());
    }

    info!(
        "Starting radae-headless (backend: {}, engine: {})",
        backend.name(),
        cfg.engine.name
    );
    let mut pipeline = start_pipeline(&cfg, cli.transmit, backend, &registry)?;

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    let mut last_callsign = None;
    let result: DynResult<()> = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break Ok(());
            }
            _ = ticker.tick() => {
                if !pipeline.is_running() {
                    error!("Audio pipeline stopped unexpectedly");
                    break Err("audio pipeline stopped".into());
                }
                last_callsign = report_status(&pipeline, last_callsign);
            }
        }
    };

    // Stopping joins the processing thread; keep it off the async workers.
    tokio::task::block_in_place(|| pipeline.stop());
    result
}
