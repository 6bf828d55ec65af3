//! Portable Executable (PE) image inspection
//!
//! Read-only helpers shared by variant scanning, version resolution and
//! companion module validation. Nothing here depends on the host platform.

pub mod exports;
pub mod image;
pub mod resources;
pub mod scanner;

#[cfg(test)]
pub(crate) mod test_support;

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

pub use exports::{ModuleMetadata, read_module_metadata};
pub use image::{DirectoryEntry, PeError, PeImage, SectionHeader};
pub use resources::{ResolveError, VersionInfo, read_version_info, resolve_version};
pub use scanner::{ScanError, Scanner, scan_file, scan_image};

/// Map `path` read-only.
///
/// The mapping is released when the returned value is dropped.
#[allow(unsafe_code)] // Required for memory-mapped file access
pub fn map_file(path: &Path) -> io::Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and only lives for the duration of a
    // single inspection; the loader never modifies files it maps.
    unsafe { Mmap::map(&file) }
}
