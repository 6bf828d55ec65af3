//! Runtime executable location
//!
//! The runtime is looked up in order: explicit override, configured name,
//! default name. When that file is missing the store executable name is
//! tried, and when a store package manifest sits above the runtime
//! directory a short list of alternate locations is probed.

use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::config::ConfigProvider;
use crate::defaults::{DEFAULT_CONFIG_FILE, LoaderConfig};
use crate::exceptions::{LoaderError, Result};

pub const CONFIG_SECTION: &str = "Loader";
pub const RUNTIME_NAME_KEY: &str = "RuntimeName";

/// Where the runtime executable was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    /// The runtime name came from configuration rather than the default
    pub custom_name: bool,
}

#[derive(Debug)]
pub struct TargetResolver<'a> {
    config: &'a LoaderConfig,
    options: &'a dyn ConfigProvider,
}

impl<'a> TargetResolver<'a> {
    pub fn new(config: &'a LoaderConfig, options: &'a dyn ConfigProvider) -> Self {
        Self { config, options }
    }

    pub fn resolve(&self, alt_exe: Option<&Path>, loader_exe_name: Option<&str>) -> Result<ResolvedTarget> {
        let configured = self.options.get_option(CONFIG_SECTION, RUNTIME_NAME_KEY);
        let custom_name = configured.is_some();
        let name = match configured {
            Some(name) => {
                info!("Using runtime name from config: {}", name);
                name
            }
            None => {
                let name = self.config.default_runtime_name.clone();
                if loader_exe_name.is_some_and(|exe| exe.eq_ignore_ascii_case(&name)) {
                    return Err(LoaderError::Config(format!(
                        "You have renamed the {} loader and have not specified the name of the runtime.",
                        self.config.product_name
                    )));
                }
                name
            }
        };

        let directory = &self.config.runtime_directory;
        let primary = match alt_exe {
            Some(path) => {
                info!("Launching alternate exe ({})", path.display());
                path.to_path_buf()
            }
            None => directory.join(&name),
        };
        debug!("procPath = {}", primary.display());

        if let Some(path) = self.first_existing(primary) {
            return Ok(ResolvedTarget { path, custom_name });
        }

        let manifest = directory.join(&self.config.store_manifest);
        if manifest.is_file() {
            info!("Detected store installation, attempting to locate executable");
            return self
                .first_existing_alternate()
                .map(|path| ResolvedTarget { path, custom_name })
                .ok_or_else(|| {
                    LoaderError::TargetNotFound(format!(
                        "This appears to be an MS Store/Gamepass installation, but could not locate the executable. \
                         You may need to run the loader with Administrator privileges or specify the path to the \
                         executable using the {RUNTIME_NAME_KEY} setting in {DEFAULT_CONFIG_FILE}."
                    ))
                });
        }

        if custom_name {
            return Err(LoaderError::TargetNotFound(format!(
                "Couldn't find {name}. You have customized the runtime name via {}'s configuration file, \
                 and that file does not exist. This can usually be fixed by removing the {RUNTIME_NAME_KEY} \
                 setting from {DEFAULT_CONFIG_FILE}.",
                self.config.product_name
            )));
        }

        Err(LoaderError::TargetNotFound(
            "Couldn't find the game executable. Please verify your installation path or manually \
             specify the executable path using the --alt-exe parameter."
                .to_string(),
        ))
    }

    /// `primary` if it exists, else the store executable in the runtime directory
    fn first_existing(&self, primary: PathBuf) -> Option<PathBuf> {
        if primary.is_file() {
            return Some(primary);
        }
        debug!("{} does not exist", primary.display());

        let store = self.config.runtime_directory.join(&self.config.store_runtime_name);
        debug!("Trying store executable: {}", store.display());
        if store.is_file() {
            info!("Found store executable");
            return Some(store);
        }
        None
    }

    fn first_existing_alternate(&self) -> Option<PathBuf> {
        self.config
            .store_alternate_locations
            .iter()
            .map(|location| self.config.runtime_directory.join(location))
            .find(|candidate| {
                debug!("Trying path: {}", candidate.display());
                candidate.is_file()
            })
    }
}
