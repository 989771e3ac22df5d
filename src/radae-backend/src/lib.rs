// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;

use radae_app::normalize_name;
use radae_core::{AudioBackend, DynResult, ModemProvider};

#[cfg(feature = "cpal")]
mod cpal_audio;
mod dummy;
mod null;

#[cfg(feature = "cpal")]
pub use cpal_audio::CpalBackend;
pub use dummy::DummyProvider;
pub use null::NullBackend;

pub type AudioBackendFactory = fn() -> DynResult<Arc<dyn AudioBackend>>;

/// Builds a modem provider; the argument is the optional model path.
pub type ModemProviderFactory = fn(Option<&str>) -> DynResult<Arc<dyn ModemProvider>>;

/// Context for registering and instantiating audio backends and modem
/// engines by name.
#[derive(Clone)]
pub struct RegistrationContext {
    audio: HashMap<String, AudioBackendFactory>,
    engines: HashMap<String, ModemProviderFactory>,
}

impl RegistrationContext {
    /// Create a new empty registration context.
    pub fn new() -> Self {
        Self {
            audio: HashMap::new(),
            engines: HashMap::new(),
        }
    }

    /// Register an audio backend factory under a stable name (e.g. "cpal").
    pub fn register_audio_backend(&mut self, name: &str, factory: AudioBackendFactory) {
        self.audio.insert(normalize_name(name), factory);
    }

    /// Register a modem engine factory under a stable name (e.g. "dummy").
    pub fn register_engine(&mut self, name: &str, factory: ModemProviderFactory) {
        self.engines.insert(normalize_name(name), factory);
    }

    pub fn is_audio_backend_registered(&self, name: &str) -> bool {
        self.audio.contains_key(&normalize_name(name))
    }

    pub fn is_engine_registered(&self, name: &str) -> bool {
        self.engines.contains_key(&normalize_name(name))
    }

    /// List registered audio backend names.
    pub fn registered_audio_backends(&self) -> Vec<String> {
        sorted_keys(&self.audio)
    }

    /// List registered engine names.
    pub fn registered_engines(&self) -> Vec<String> {
        sorted_keys(&self.engines)
    }

    /// Instantiate an audio backend by name.
    pub fn build_audio_backend(&self, name: &str) -> DynResult<Arc<dyn AudioBackend>> {
        let factory = self
            .audio
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown audio backend: {}", name))?;
        factory()
    }

    /// Instantiate a modem provider by name.
    pub fn build_engine(&self, name: &str, model: Option<&str>) -> DynResult<Arc<dyn ModemProvider>> {
        let factory = self
            .engines
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown modem engine: {}", name))?;
        factory(model)
    }

    /// Merge another registration context into this one.
    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (name, factory) in &other.audio {
            self.audio.insert(name.clone(), *factory);
        }
        for (name, factory) in &other.engines {
            self.engines.insert(name.clone(), *factory);
        }
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

/// Register all built-in backends and engines enabled by features.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_audio_backend("null", null_factory);
    #[cfg(feature = "cpal")]
    context.register_audio_backend("cpal", cpal_factory);
    context.register_engine("dummy", dummy_factory);
}

fn null_factory() -> DynResult<Arc<dyn AudioBackend>> {
    Ok(Arc::new(NullBackend::new()))
}

#[cfg(feature = "cpal")]
fn cpal_factory() -> DynResult<Arc<dyn AudioBackend>> {
    Ok(Arc::new(CpalBackend::new()))
}

fn dummy_factory(model: Option<&str>) -> DynResult<Arc<dyn ModemProvider>> {
    if let Some(path) = model {
        return Err(format!("dummy engine does not load models (got '{}')", path).into());
    }
    Ok(Arc::new(DummyProvider::new()))
}
