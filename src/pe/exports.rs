//! Export directory lookup and the companion module version record

use log::trace;
use serde::Serialize;

use crate::pe::image::{DirectoryEntry, PeImage};

/// Version record a companion module exports by name.
///
/// Layout: two little-endian `u32` values, the record layout revision
/// followed by the compact runtime version the module was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleMetadata {
    pub data_version: u32,
    pub runtime_version: u32,
}

impl ModuleMetadata {
    pub const SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.data_version.to_le_bytes());
        out[4..].copy_from_slice(&self.runtime_version.to_le_bytes());
        out
    }
}

/// RVA of the export called `name`, or `None` when it is absent,
/// forwarded, or the export directory is malformed.
pub fn export_rva(image: &PeImage<'_>, name: &str) -> Option<u32> {
    let directory = image.directory(DirectoryEntry::Export)?;
    let base = image.rva_to_offset(directory.virtual_address)?;

    let function_count = image.u32_at(base + 20).ok()?;
    let name_count = image.u32_at(base + 24).ok()?;
    let functions = image.rva_to_offset(image.u32_at(base + 28).ok()?)?;
    let names = image.rva_to_offset(image.u32_at(base + 32).ok()?)?;
    let ordinals = image.rva_to_offset(image.u32_at(base + 36).ok()?)?;

    for i in 0..name_count as usize {
        let name_rva = image.u32_at(names + i * 4).ok()?;
        if image.cstr_at_rva(name_rva) != Some(name.as_bytes()) {
            continue;
        }

        let ordinal = image.u16_at(ordinals + i * 2).ok()?;
        if u32::from(ordinal) >= function_count {
            return None;
        }
        let rva = image.u32_at(functions + usize::from(ordinal) * 4).ok()?;

        // RVAs pointing back into the export directory are forwarder strings
        let directory_end = directory.virtual_address.saturating_add(directory.size);
        if (directory.virtual_address..directory_end).contains(&rva) {
            trace!("Export {} is forwarded", name);
            return None;
        }

        trace!("Export {} at RVA 0x{:x}", name, rva);
        return Some(rva);
    }

    None
}

/// Read the version record exported as `export`
pub fn read_module_metadata(image: &PeImage<'_>, export: &str) -> Option<ModuleMetadata> {
    let offset = image.rva_to_offset(export_rva(image, export)?)?;
    Some(ModuleMetadata {
        data_version: image.u32_at(offset).ok()?,
        runtime_version: image.u32_at(offset + 4).ok()?,
    })
}
