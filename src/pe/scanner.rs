//! Distribution variant scanner
//!
//! Classifies a runtime executable by probing its section table and import
//! directory. Probes run in a fixed order and the first one that matches
//! decides the variant; an image no probe recognizes is `Normal`.

use log::{debug, trace, warn};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::defaults::LoaderConfig;
use crate::pe::image::PeImage;
use crate::pe::map_file;
use crate::runtime::variant::ExecutableVariant;
use crate::utils::path_contains_any;

/// Windows ERROR_ACCESS_DENIED
const ERROR_ACCESS_DENIED: i32 = 5;

/// The file to scan could not be opened or mapped
#[derive(Debug)]
pub struct ScanError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl ScanError {
    /// OS error code, when the failure came from the OS
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    pub fn is_access_denied(&self) -> bool {
        self.source.kind() == io::ErrorKind::PermissionDenied
            || self.raw_os_error() == Some(ERROR_ACCESS_DENIED)
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw_os_error() {
            Some(code) => write!(f, "couldn't open {} ({code})", self.path.display()),
            None => write!(f, "couldn't open {}: {}", self.path.display(), self.source),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Parsed image plus the facts probes commonly need
#[derive(Debug)]
pub struct ImageFacts<'a> {
    pub image: PeImage<'a>,
    pub imports: Vec<String>,
}

impl<'a> ImageFacts<'a> {
    pub fn new(image: PeImage<'a>) -> Self {
        let imports = image.imported_libraries();
        Self { image, imports }
    }

    pub fn imports_library(&self, library: &str) -> bool {
        self.imports
            .iter()
            .any(|name| name.eq_ignore_ascii_case(library))
    }
}

/// One independent classification signal
pub trait VariantProbe: fmt::Debug + Send + Sync {
    fn probe(&self, facts: &ImageFacts<'_>) -> Option<ExecutableVariant>;
}

/// Matches when a section with the given name exists
#[derive(Debug, Clone)]
pub struct SectionProbe {
    pub section: &'static str,
    pub variant: ExecutableVariant,
}

impl VariantProbe for SectionProbe {
    fn probe(&self, facts: &ImageFacts<'_>) -> Option<ExecutableVariant> {
        facts.image.section(self.section).map(|_| self.variant)
    }
}

/// Matches when the import directory references the given library
#[derive(Debug, Clone)]
pub struct ImportProbe {
    pub library: &'static str,
    pub variant: ExecutableVariant,
}

impl VariantProbe for ImportProbe {
    fn probe(&self, facts: &ImageFacts<'_>) -> Option<ExecutableVariant> {
        facts.imports_library(self.library).then_some(self.variant)
    }
}

/// Ordered probe list plus path naming conventions
#[derive(Debug)]
pub struct Scanner {
    probes: Vec<Box<dyn VariantProbe>>,
    path_hints: Vec<(String, ExecutableVariant)>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::with_store_marker(crate::defaults::STORE_RUNTIME_MARKER)
    }
}

impl Scanner {
    /// Default probes, with store builds named by `config.store_runtime_marker`
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::with_store_marker(&config.store_runtime_marker)
    }

    fn with_store_marker(marker: &str) -> Self {
        Self::new(
            vec![
                Box::new(SectionProbe {
                    section: "UPX0",
                    variant: ExecutableVariant::Packed,
                }),
                Box::new(SectionProbe {
                    section: ".bind",
                    variant: ExecutableVariant::Steam,
                }),
                Box::new(ImportProbe {
                    library: "api-ms-win-core-psm-appnotify-l1-1-0.dll",
                    variant: ExecutableVariant::WinStore,
                }),
                Box::new(ImportProbe {
                    library: "Galaxy64.dll",
                    variant: ExecutableVariant::Gog,
                }),
                Box::new(ImportProbe {
                    library: "eossdk-win64-shipping.dll",
                    variant: ExecutableVariant::Epic,
                }),
            ],
            vec![(marker.to_string(), ExecutableVariant::WinStore)],
        )
    }

    pub fn new(
        probes: Vec<Box<dyn VariantProbe>>,
        path_hints: Vec<(String, ExecutableVariant)>,
    ) -> Self {
        Self { probes, path_hints }
    }

    /// Variant implied by the path alone, if any
    pub fn classify_path(&self, path: &Path) -> Option<ExecutableVariant> {
        let text = path.to_string_lossy();
        self.path_hints
            .iter()
            .find(|(marker, _)| text.contains(marker.as_str()))
            .map(|(_, variant)| *variant)
    }

    /// Classify image bytes. Does not touch the filesystem.
    pub fn scan_image(&self, bytes: &[u8], path: &Path) -> ExecutableVariant {
        if let Some(variant) = self.classify_path(path) {
            debug!("🔎 {} classified as {} by name", path.display(), variant);
            return variant;
        }

        let image = match PeImage::parse(bytes) {
            Ok(image) => image,
            Err(e) => {
                debug!("🔎 {} is not a PE image: {}", path.display(), e);
                return ExecutableVariant::Unknown;
            }
        };
        let facts = ImageFacts::new(image);
        trace!(
            "Sections: {:?}",
            facts.image.sections().iter().map(|s| s.name()).collect::<Vec<_>>()
        );

        let variant = self
            .probes
            .iter()
            .find_map(|probe| probe.probe(&facts))
            .unwrap_or(ExecutableVariant::Normal);
        debug!("🔎 {} classified as {}", path.display(), variant);
        variant
    }

    /// Map `path` read-only and classify it
    pub fn scan_file(&self, path: &Path) -> Result<ExecutableVariant, ScanError> {
        if let Some(variant) = self.classify_path(path) {
            debug!("🔎 {} classified as {} by name", path.display(), variant);
            return Ok(variant);
        }

        let mapping = map_file(path).map_err(|source| ScanError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.scan_image(&mapping, path))
    }
}

/// Classify image bytes with the default probes
pub fn scan_image(bytes: &[u8], path: &Path) -> ExecutableVariant {
    Scanner::default().scan_image(bytes, path)
}

/// Classify the file at `path` with the default probes
pub fn scan_file(path: &Path) -> Result<ExecutableVariant, ScanError> {
    Scanner::default().scan_file(path)
}

/// Store installs deny read access to their executables. When that happens
/// under a store path, assume the store build.
pub fn recover_scan_error<S: AsRef<str>>(err: &ScanError, store_markers: &[S]) -> Option<ExecutableVariant> {
    if err.is_access_denied() && path_contains_any(&err.path, store_markers) {
        warn!(
            "Access denied reading {}; assuming the store build",
            err.path.display()
        );
        return Some(ExecutableVariant::WinStore);
    }
    None
}
