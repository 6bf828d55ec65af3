// Centralized loader defaults

use std::path::PathBuf;

use crate::runtime::{ExpectedRuntime, RuntimeFamily, VersionTriple};

// =================================
// Runtime identity
// =================================
pub const DEFAULT_RUNTIME_TITLE: &str = "Oblivion Remastered";
pub const DEFAULT_RUNTIME_NAME: &str = "OblivionRemastered-Win64-Shipping.exe";
pub const DEFAULT_STORE_RUNTIME_NAME: &str = "OblivionRemastered-WinGDK-Shipping.exe";
pub const DEFAULT_STEAM_APP_ID: &str = "2623190";

/// Runtime build this loader release targets
pub const EXPECTED_RUNTIME_VERSION: VersionTriple = VersionTriple::new(0, 411, 140, 0);
pub const EXPECTED_RUNTIME_FAMILY: RuntimeFamily = RuntimeFamily::Steam;

/// Version assumed for store builds whose version resource is unreadable
pub const STORE_FALLBACK_VERSION: VersionTriple =
    VersionTriple::new(0, 411, 140, RuntimeFamily::MsStore.sub_tag());

// =================================
// Store install detection
// =================================
/// Path fragment that identifies a store build by name alone
pub const STORE_RUNTIME_MARKER: &str = "WinGDK";
/// Path fragments that indicate a protected store install location
pub const STORE_PATH_MARKERS: &[&str] = &["WindowsApps", "WinGDK"];
/// Package manifest, relative to the runtime directory
pub const STORE_MANIFEST: &str = "../../../appxmanifest.xml";
/// Probed in order when a store manifest is present
pub const STORE_ALTERNATE_LOCATIONS: &[&str] = &[
    "OblivionRemastered-WinGDK-Shipping.exe",
    "OblivionRemastered-Win64-Shipping.exe",
    "../OblivionRemastered-WinGDK-Shipping.exe",
    "../OblivionRemastered-Win64-Shipping.exe",
    "../../OblivionRemastered-WinGDK-Shipping.exe",
    "../../OblivionRemastered-Win64-Shipping.exe",
];

// =================================
// Companion module
// =================================
pub const DEFAULT_PRODUCT_NAME: &str = "XSE64";
pub const DEFAULT_MODULE_BASE_NAME: &str = "xse64";
pub const DEFAULT_EDITOR_MODULE_BASE_NAME: &str = "xse64_editor";
pub const DEFAULT_MODULE_EXTENSION: &str = "dll";
pub const DEFAULT_VERSION_EXPORT: &str = "XSECore_Version";
/// Layout revision of the exported version record
pub const MODULE_DATA_VERSION: u32 = 1;
pub const SIGNATURE_EXTENSION: &str = "sig";

// =================================
// Launch defaults
// =================================
pub const DEFAULT_INJECTION_TIMEOUT_MS: u32 = 60_000;
pub const DEFAULT_CONFIG_FILE: &str = "xse64_loader.json";
pub const ENV_PREFIX: &str = "XSE";

/// Everything the loader knows about the runtime it serves
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub runtime_directory: PathBuf,
    pub runtime_title: String,
    pub default_runtime_name: String,
    pub store_runtime_name: String,
    pub store_runtime_marker: String,
    pub store_path_markers: Vec<String>,
    pub store_manifest: PathBuf,
    pub store_alternate_locations: Vec<PathBuf>,
    pub product_name: String,
    pub loader_version: String,
    /// Loader release matching the stable runtime, for the channel-switch hint
    pub stable_loader_version: String,
    pub module_base_name: String,
    pub editor_module_base_name: String,
    pub module_extension: String,
    pub version_export: String,
    pub module_data_version: u32,
    pub expected: ExpectedRuntime,
    pub steam_app_id: String,
    pub store_fallback_version: VersionTriple,
    pub injection_timeout_ms: u32,
}

impl LoaderConfig {
    /// Defaults rooted at `runtime_directory`
    pub fn for_directory(runtime_directory: impl Into<PathBuf>) -> Self {
        Self {
            runtime_directory: runtime_directory.into(),
            ..Self::default()
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            runtime_directory: crate::utils::runtime_directory(),
            runtime_title: DEFAULT_RUNTIME_TITLE.to_string(),
            default_runtime_name: DEFAULT_RUNTIME_NAME.to_string(),
            store_runtime_name: DEFAULT_STORE_RUNTIME_NAME.to_string(),
            store_runtime_marker: STORE_RUNTIME_MARKER.to_string(),
            store_path_markers: STORE_PATH_MARKERS.iter().map(|s| s.to_string()).collect(),
            store_manifest: PathBuf::from(STORE_MANIFEST),
            store_alternate_locations: STORE_ALTERNATE_LOCATIONS.iter().map(PathBuf::from).collect(),
            product_name: DEFAULT_PRODUCT_NAME.to_string(),
            loader_version: crate::version::VERSION.to_string(),
            stable_loader_version: crate::version::VERSION.to_string(),
            module_base_name: DEFAULT_MODULE_BASE_NAME.to_string(),
            editor_module_base_name: DEFAULT_EDITOR_MODULE_BASE_NAME.to_string(),
            module_extension: DEFAULT_MODULE_EXTENSION.to_string(),
            version_export: DEFAULT_VERSION_EXPORT.to_string(),
            module_data_version: MODULE_DATA_VERSION,
            expected: ExpectedRuntime::new(EXPECTED_RUNTIME_VERSION, EXPECTED_RUNTIME_FAMILY),
            steam_app_id: DEFAULT_STEAM_APP_ID.to_string(),
            store_fallback_version: STORE_FALLBACK_VERSION,
            injection_timeout_ms: DEFAULT_INJECTION_TIMEOUT_MS,
        }
    }
}
