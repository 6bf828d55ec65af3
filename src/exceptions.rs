//! Error types for the loader

use std::fmt;

use crate::launcher::process::SpawnError;
use crate::pe::resources::ResolveError;
use crate::pe::scanner::ScanError;

/// Main error type for loader operations
#[derive(Debug)]
pub enum LoaderError {
    /// No runtime executable could be located
    TargetNotFound(String),

    /// The runtime executable could not be identified
    Identification(String),

    /// The runtime build is not compatible with this loader
    Incompatible(String),

    /// The runtime process could not be created
    Spawn(String),

    /// The companion module failed validation
    ModuleRejected(String),

    /// The companion module could not be injected
    InjectionFailed(String),

    /// Configuration could not be read
    Config(String),

    /// Generic error with message
    Generic(String),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::TargetNotFound(msg) => write!(f, "{msg}"),
            LoaderError::Identification(msg) => write!(f, "{msg}"),
            LoaderError::Incompatible(msg) => write!(f, "{msg}"),
            LoaderError::Spawn(msg) => write!(f, "{msg}"),
            LoaderError::ModuleRejected(msg) => write!(f, "{msg}"),
            LoaderError::InjectionFailed(msg) => write!(f, "Couldn't inject DLL: {msg}"),
            LoaderError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LoaderError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<anyhow::Error> for LoaderError {
    fn from(err: anyhow::Error) -> Self {
        LoaderError::Generic(format!("{err:#}"))
    }
}

impl From<ScanError> for LoaderError {
    fn from(err: ScanError) -> Self {
        LoaderError::Identification(format!("Failed to identify EXE type: {err}"))
    }
}

impl From<ResolveError> for LoaderError {
    fn from(err: ResolveError) -> Self {
        LoaderError::Identification(format!(
            "Couldn't retrieve EXE version information: {err}"
        ))
    }
}

impl From<SpawnError> for LoaderError {
    fn from(err: SpawnError) -> Self {
        LoaderError::Spawn(err.to_string())
    }
}

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_scan_failure_is_identification_error() {
        let err = LoaderError::from(ScanError {
            path: PathBuf::from("Runtime.exe"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert!(matches!(err, LoaderError::Identification(_)));
        assert!(err.to_string().starts_with("Failed to identify EXE type: "));
    }

    #[test]
    fn test_anyhow_errors_keep_context() {
        let err = LoaderError::from(anyhow::anyhow!("root cause").context("Failed to read config"));
        assert!(matches!(err, LoaderError::Generic(_)));
        assert_eq!(err.to_string(), "Failed to read config: root cause");
    }

    #[test]
    fn test_config_message() {
        assert_eq!(
            LoaderError::Config("bad value".to_string()).to_string(),
            "Configuration error: bad value"
        );
    }
}
