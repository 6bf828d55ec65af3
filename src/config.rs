//! Loader configuration sources
//!
//! Options are addressed by `(section, key)`, e.g. `("Loader", "RuntimeName")`.
//! A JSON file, the process environment, or a layered combination can
//! provide them.

use anyhow::{Context, Result};
use log::{debug, trace};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::defaults::ENV_PREFIX;

/// Source of named configuration options
pub trait ConfigProvider: fmt::Debug {
    fn get_option(&self, section: &str, key: &str) -> Option<String>;
}

/// Options read from a JSON document of the form
/// `{"Loader": {"RuntimeName": "Game.exe"}}`
#[derive(Debug, Default)]
pub struct JsonConfig {
    sections: HashMap<String, HashMap<String, String>>,
}

impl JsonConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text).context("Failed to parse configuration JSON")?;
        let Value::Object(root) = document else {
            anyhow::bail!("Configuration root must be a JSON object");
        };

        let mut sections = HashMap::new();
        for (section, body) in root {
            let Value::Object(entries) = body else {
                debug!("⚙️ Ignoring non-object configuration section '{}'", section);
                continue;
            };
            let values: HashMap<String, String> = entries
                .into_iter()
                .filter_map(|(key, value)| {
                    let text = match value {
                        Value::String(s) => s,
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key, text))
                })
                .collect();
            sections.insert(section, values);
        }

        Ok(Self { sections })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config = Self::parse(&text)?;
        debug!("⚙️ Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists; a missing file is an empty configuration
    pub fn load_optional(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            trace!("No configuration file at {}", path.display());
            Ok(Self::default())
        }
    }
}

impl ConfigProvider for JsonConfig {
    fn get_option(&self, section: &str, key: &str) -> Option<String> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(key))
            .filter(|value| !value.is_empty())
            .cloned()
    }
}

/// Options read from `XSE_<SECTION>_<KEY>` environment variables
#[derive(Debug, Default)]
pub struct EnvConfig;

impl EnvConfig {
    pub fn variable_name(section: &str, key: &str) -> String {
        format!("{}_{}_{}", ENV_PREFIX, section.to_uppercase(), key.to_uppercase())
    }
}

impl ConfigProvider for EnvConfig {
    fn get_option(&self, section: &str, key: &str) -> Option<String> {
        env::var(Self::variable_name(section, key))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// First provider with a value wins
#[derive(Debug, Default)]
pub struct LayeredConfig {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl LayeredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: impl ConfigProvider + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl ConfigProvider for LayeredConfig {
    fn get_option(&self, section: &str, key: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get_option(section, key))
    }
}
