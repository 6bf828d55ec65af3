//! Companion module location and validation

use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::defaults::LoaderConfig;
use crate::exceptions::{LoaderError, Result};
use crate::launcher::signer::Signer;
use crate::pe::exports::{ModuleMetadata, read_module_metadata};
use crate::pe::image::PeImage;
use crate::pe::{map_file, read_version_info};
use crate::runtime::compat::TargetKind;
use crate::runtime::version::VersionTriple;

/// A companion module that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub path: PathBuf,
    pub metadata: ModuleMetadata,
    pub signature_verified: bool,
}

/// `<runtimeDir>/<base>_<suffix>.<ext>`, or `<base>.<ext>` for an empty
/// suffix. An override is used verbatim.
pub fn module_path(
    config: &LoaderConfig,
    kind: TargetKind,
    suffix: &str,
    override_path: Option<&Path>,
) -> PathBuf {
    if let Some(path) = override_path {
        info!("Launching alternate dll ({})", path.display());
        return path.to_path_buf();
    }

    let base = match kind {
        TargetKind::Runtime => &config.module_base_name,
        TargetKind::Editor => &config.editor_module_base_name,
    };
    let file_name = if suffix.is_empty() {
        format!("{base}.{}", config.module_extension)
    } else {
        format!("{base}_{suffix}.{}", config.module_extension)
    };
    config.runtime_directory.join(file_name)
}

/// Check that `path` is a 64-bit module built for `runtime` and carrying a
/// valid signature.
pub fn validate_module(
    path: &Path,
    runtime: VersionTriple,
    config: &LoaderConfig,
    signer: &dyn Signer,
) -> Result<ModuleDescriptor> {
    if !path.is_file() {
        return Err(LoaderError::ModuleRejected(format!(
            "Couldn't find {loader} DLL ({}).\n\
             Either you have not installed {loader} correctly, or a new version of {title} has been released.\n\
             Please make sure you have installed {loader} correctly and are running it from your {title} folder.\n\
             If a game patch was released since you last ran the game, please check the website for updates.\n\
             You have game version {} installed. The loader is not lying to you.\n\
             Check your game installation if you are still confused.",
            path.display(),
            runtime.release_string(),
            loader = config.product_name,
            title = config.runtime_title,
        )));
    }

    let expected = runtime.compact();
    let metadata = inspect(path, config);
    let found = metadata.map_or(0, |m| m.runtime_version);

    let accepted = metadata.filter(|m| {
        m.data_version == config.module_data_version && m.runtime_version == expected
    });
    let descriptor = match accepted {
        Some(metadata) if signer.verify(path) => ModuleDescriptor {
            path: path.to_path_buf(),
            metadata,
            signature_verified: signer.checks_signatures(),
        },
        _ => {
            dump_version(path);
            return Err(LoaderError::ModuleRejected(format!(
                "Bad {} DLL ({}).\n\
                 Do not rename files; it will not magically make anything work.\n\
                 {expected:08X} {found:08X}",
                config.product_name,
                path.display()
            )));
        }
    };

    debug!("dll = {}", descriptor.path.display());
    Ok(descriptor)
}

/// Version record of a PE32+ module, `None` for anything else
fn inspect(path: &Path, config: &LoaderConfig) -> Option<ModuleMetadata> {
    let mapping = match map_file(path) {
        Ok(mapping) => mapping,
        Err(e) => {
            debug!("Couldn't map {}: {}", path.display(), e);
            return None;
        }
    };
    let image = match PeImage::parse(&mapping) {
        Ok(image) => image,
        Err(e) => {
            debug!("{} is not a PE image: {}", path.display(), e);
            return None;
        }
    };
    if !image.is_pe32_plus() {
        debug!("{} is not a 64-bit module", path.display());
        return None;
    }
    read_module_metadata(&image, &config.version_export)
}

fn dump_version(path: &Path) {
    match read_version_info(path) {
        Ok(info) => {
            debug!("DLL version");
            debug!("productName = {:?}", info.product_name);
            debug!("productVersion = {}", info.version);
        }
        Err(e) => debug!("couldn't get file version info: {}", e),
    }
}
