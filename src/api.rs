//! High-level API for loader operations

use std::path::{Path, PathBuf};

use crate::config::{EnvConfig, JsonConfig, LayeredConfig};
use crate::defaults::{DEFAULT_CONFIG_FILE, LoaderConfig};
use crate::exceptions::Result;
use crate::launcher::process::UnsupportedSpawner;
use crate::launcher::{
    Ed25519Signer, LaunchReport, LaunchRequest, Orchestrator, RuntimeIdentity, Signer,
    UncheckedSigner, UnsupportedInjector, default_injector, default_spawner,
};
use crate::runtime::{MatchOutcome, TargetKind, evaluate};

/// Options for locating configuration and keys
#[derive(Debug, Default)]
pub struct LoaderOptions {
    /// Configuration file; defaults to `xse64_loader.json` in the runtime directory
    pub config_path: Option<PathBuf>,
    /// Public key (PEM format) for module signatures; signatures are not
    /// checked without one
    pub public_key_path: Option<PathBuf>,
    /// Directory holding the runtime and modules; defaults to the loader's own
    pub runtime_directory: Option<PathBuf>,
}

impl LoaderOptions {
    pub fn loader_config(&self) -> LoaderConfig {
        match &self.runtime_directory {
            Some(dir) => LoaderConfig::for_directory(dir),
            None => LoaderConfig::default(),
        }
    }
}

/// Environment first, then the configuration file
pub fn config_sources(config: &LoaderConfig, options: &LoaderOptions) -> Result<LayeredConfig> {
    let path = options
        .config_path
        .clone()
        .unwrap_or_else(|| config.runtime_directory.join(DEFAULT_CONFIG_FILE));
    Ok(LayeredConfig::new()
        .with_layer(EnvConfig)
        .with_layer(JsonConfig::load_optional(&path)?))
}

pub fn module_signer(options: &LoaderOptions) -> Result<Box<dyn Signer>> {
    match &options.public_key_path {
        Some(path) => Ok(Box::new(Ed25519Signer::from_pem_file(path)?)),
        None => Ok(Box::new(UncheckedSigner)),
    }
}

/// Identify the executable at `path` and match it against this loader
pub fn identify_runtime(
    path: &Path,
    kind: TargetKind,
    options: &LoaderOptions,
) -> Result<(RuntimeIdentity, MatchOutcome)> {
    let config = options.loader_config();
    let sources = config_sources(&config, options)?;
    let orchestrator = Orchestrator::new(
        &config,
        &sources,
        &UnsupportedSpawner,
        &UnsupportedInjector,
        &UncheckedSigner,
    );
    let identity = orchestrator.identify(path)?;
    let outcome = evaluate(&identity.scanned(), &config.expected, kind);
    Ok((identity, outcome))
}

/// Run the full launch sequence with the host platform's collaborators
pub fn launch_runtime(request: &LaunchRequest, options: &LoaderOptions) -> Result<LaunchReport> {
    let config = options.loader_config();
    let sources = config_sources(&config, options)?;
    let signer = module_signer(options)?;
    let spawner = default_spawner();
    let injector = default_injector(config.injection_timeout_ms);

    Orchestrator::new(&config, &sources, spawner.as_ref(), injector.as_ref(), signer.as_ref())
        .launch(request)
}
