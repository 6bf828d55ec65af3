//! Utility functions for the loader

use std::env;
use std::path::{Path, PathBuf};

/// Get normalized platform string in format 'os_arch'
///
/// Returns strings like:
/// - "windows_amd64" for Windows x86_64
/// - "linux_amd64" for Linux x86_64
pub fn get_platform_string() -> String {
    let os = match env::consts::OS {
        "macos" => "darwin",
        other => other,
    };

    let arch = match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    format!("{os}_{arch}")
}

/// Directory holding the loader executable, which is also where the runtime
/// and companion modules live. Falls back to the working directory.
pub fn runtime_directory() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// File name of the running loader executable
pub fn loader_executable_name() -> Option<String> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
}

/// Whether any of `markers` occurs in the textual form of `path`
pub fn path_contains_any<S: AsRef<str>>(path: &Path, markers: &[S]) -> bool {
    let text = path.to_string_lossy();
    markers.iter().any(|marker| text.contains(marker.as_ref()))
}
