//! Bounds-checked PE image reader
//!
//! Walks the DOS header, COFF header, optional header, data directories and
//! section table of a Windows PE (Portable Executable) image held in a byte
//! slice. Every access is range checked; malformed input produces a `PeError`
//! or `None` instead of reading out of bounds.

use log::{debug, trace};
use std::fmt;

/// Offset of the e_lfanew field in the DOS header
const E_LFANEW_OFFSET: usize = 0x3C;

/// Size of the COFF file header that follows the PE signature
const COFF_HEADER_SIZE: usize = 20;

/// Size of one section table entry
const SECTION_HEADER_SIZE: usize = 40;

/// Optional header magic for PE32 images
pub const PE32_MAGIC: u16 = 0x10B;

/// Optional header magic for PE32+ (64-bit) images
pub const PE32_PLUS_MAGIC: u16 = 0x20B;

/// Upper bound on data directory entries defined by the format
const MAX_DATA_DIRECTORIES: usize = 16;

/// Errors produced while parsing a PE image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeError {
    /// A read at `offset` of `len` bytes falls outside the image
    Truncated { offset: usize, len: usize },
    /// Missing "MZ" signature
    NotExecutable,
    /// Missing "PE\0\0" signature at e_lfanew
    BadPeSignature(usize),
    /// Optional header magic is neither PE32 nor PE32+
    UnknownOptionalHeader(u16),
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeError::Truncated { offset, len } => {
                write!(f, "read of {len} bytes at offset 0x{offset:x} is out of bounds")
            }
            PeError::NotExecutable => write!(f, "missing MZ signature"),
            PeError::BadPeSignature(offset) => {
                write!(f, "missing PE signature at offset 0x{offset:x}")
            }
            PeError::UnknownOptionalHeader(magic) => {
                write!(f, "unknown optional header magic 0x{magic:x}")
            }
        }
    }
}

impl std::error::Error for PeError {}

/// Data directory indices used by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEntry {
    Export = 0,
    Import = 1,
    Resource = 2,
}

/// One entry of the optional header data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// One entry of the section table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

impl SectionHeader {
    /// Section name with trailing NUL padding removed
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Whether `rva` falls inside this section's virtual address range
    fn contains(&self, rva: u32) -> bool {
        let span = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && u64::from(rva) < u64::from(self.virtual_address) + u64::from(span)
    }
}

/// Check if data starts with a valid Windows PE executable header.
pub fn is_pe_executable(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == b'M' && data[1] == b'Z'
}

/// Parsed view over a PE image
#[derive(Debug)]
pub struct PeImage<'a> {
    data: &'a [u8],
    pe_offset: usize,
    optional_magic: u16,
    directories: Vec<DataDirectory>,
    sections: Vec<SectionHeader>,
}

impl<'a> PeImage<'a> {
    /// Parse the headers of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, PeError> {
        if !is_pe_executable(data) {
            return Err(PeError::NotExecutable);
        }

        let pe_offset = read_u32(data, E_LFANEW_OFFSET)? as usize;
        if bytes(data, pe_offset, 4)? != b"PE\x00\x00" {
            return Err(PeError::BadPeSignature(pe_offset));
        }

        let coff_offset = pe_offset + 4;
        let section_count = read_u16(data, coff_offset + 2)? as usize;
        let optional_size = read_u16(data, coff_offset + 16)? as usize;
        let optional_offset = coff_offset + COFF_HEADER_SIZE;

        let optional_magic = read_u16(data, optional_offset)?;
        let (count_offset, directory_offset) = match optional_magic {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            other => return Err(PeError::UnknownOptionalHeader(other)),
        };

        // Directory count is clamped to what the optional header can hold
        let declared = read_u32(data, optional_offset + count_offset)? as usize;
        let room = optional_size.saturating_sub(directory_offset) / 8;
        let directory_count = declared.min(room).min(MAX_DATA_DIRECTORIES);

        let mut directories = Vec::with_capacity(directory_count);
        for i in 0..directory_count {
            let entry = optional_offset + directory_offset + i * 8;
            directories.push(DataDirectory {
                virtual_address: read_u32(data, entry)?,
                size: read_u32(data, entry + 4)?,
            });
        }

        let section_table = optional_offset + optional_size;
        let mut sections = Vec::with_capacity(section_count);
        for i in 0..section_count {
            let header = section_table + i * SECTION_HEADER_SIZE;
            let mut name = [0u8; 8];
            name.copy_from_slice(bytes(data, header, 8)?);
            sections.push(SectionHeader {
                name,
                virtual_size: read_u32(data, header + 8)?,
                virtual_address: read_u32(data, header + 12)?,
                size_of_raw_data: read_u32(data, header + 16)?,
                pointer_to_raw_data: read_u32(data, header + 20)?,
            });
        }

        trace!(
            "Parsed PE headers: pe_offset=0x{:x}, magic=0x{:x}, sections={}, directories={}",
            pe_offset,
            optional_magic,
            sections.len(),
            directories.len()
        );

        Ok(Self {
            data,
            pe_offset,
            optional_magic,
            directories,
            sections,
        })
    }

    /// Raw image bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Offset of the PE signature (e_lfanew)
    pub fn pe_offset(&self) -> usize {
        self.pe_offset
    }

    /// Whether this is a 64-bit (PE32+) image
    pub fn is_pe32_plus(&self) -> bool {
        self.optional_magic == PE32_PLUS_MAGIC
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Find a section by exact name
    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name() == name)
    }

    /// Data directory entry, or `None` when absent or empty
    pub fn directory(&self, entry: DirectoryEntry) -> Option<DataDirectory> {
        self.directories
            .get(entry as usize)
            .copied()
            .filter(|d| d.virtual_address != 0 && d.size != 0)
    }

    /// Map a Relative Virtual Address (RVA) to a file offset by walking the section table.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        for (i, section) in self.sections.iter().enumerate() {
            if section.contains(rva) {
                let offset = u64::from(rva) - u64::from(section.virtual_address)
                    + u64::from(section.pointer_to_raw_data);
                trace!(
                    "Mapped RVA 0x{:x} to file offset 0x{:x} (section {}, VA=0x{:x})",
                    rva, offset, i, section.virtual_address
                );
                return usize::try_from(offset).ok();
            }
        }

        trace!("RVA 0x{:x} not found in any section", rva);
        None
    }

    /// Read `len` bytes at a file offset
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8], PeError> {
        bytes(self.data, offset, len)
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, PeError> {
        read_u16(self.data, offset)
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, PeError> {
        read_u32(self.data, offset)
    }

    /// Read a NUL-terminated byte string starting at a file offset
    pub fn cstr_at(&self, offset: usize) -> Option<&'a [u8]> {
        let tail = self.data.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    }

    /// Read a NUL-terminated byte string addressed by RVA
    pub fn cstr_at_rva(&self, rva: u32) -> Option<&'a [u8]> {
        self.cstr_at(self.rva_to_offset(rva)?)
    }

    /// Names of all libraries referenced by the import directory.
    ///
    /// Descriptors are read until the all-zero terminating entry or the end
    /// of the image; names that cannot be resolved are skipped.
    pub fn imported_libraries(&self) -> Vec<String> {
        const DESCRIPTOR_SIZE: usize = 20;

        let Some(import_dir) = self.directory(DirectoryEntry::Import) else {
            trace!("No import directory present");
            return Vec::new();
        };
        let Some(table) = self.rva_to_offset(import_dir.virtual_address) else {
            debug!(
                "Import directory RVA 0x{:x} does not map to a section",
                import_dir.virtual_address
            );
            return Vec::new();
        };

        let mut names = Vec::new();
        let mut descriptor = table;
        while let (Ok(characteristics), Ok(name_rva)) =
            (self.u32_at(descriptor), self.u32_at(descriptor + 12))
        {
            // Some linkers leave Characteristics zero, so only a zero name ends the table
            if characteristics == 0 && name_rva == 0 {
                break;
            }
            if let Some(name) = self.cstr_at_rva(name_rva) {
                names.push(String::from_utf8_lossy(name).into_owned());
            }
            descriptor += DESCRIPTOR_SIZE;
        }

        trace!("Imported libraries: {:?}", names);
        names
    }

    /// Whether the import directory references `library` (case-insensitive)
    pub fn imports_library(&self, library: &str) -> bool {
        self.imported_libraries()
            .iter()
            .any(|name| name.eq_ignore_ascii_case(library))
    }
}

fn bytes(data: &[u8], offset: usize, len: usize) -> Result<&[u8], PeError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(PeError::Truncated { offset, len })
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, PeError> {
    let b = bytes(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, PeError> {
    let b = bytes(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::test_support::PeBuilder;

    #[test]
    fn test_is_pe_executable() {
        assert!(is_pe_executable(b"MZ\x90\x00"));
        assert!(!is_pe_executable(b"\x7fELF"));
        assert!(!is_pe_executable(b"M"));
    }

    #[test]
    fn test_parse_rejects_truncated_headers() {
        let mut data = vec![0u8; 0x40];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());

        assert_eq!(
            PeImage::parse(&data).unwrap_err(),
            PeError::Truncated { offset: 0x80, len: 4 }
        );
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let mut data = PeBuilder::new().build();
        data[0x80] = b'X';
        assert_eq!(PeImage::parse(&data).unwrap_err(), PeError::BadPeSignature(0x80));
    }

    #[test]
    fn test_sections_and_rva_mapping() {
        let data = PeBuilder::new().section(".bind").build();
        let image = PeImage::parse(&data).unwrap();

        assert!(image.is_pe32_plus());
        assert!(image.section(".rdata").is_some());
        assert!(image.section(".bind").is_some());
        assert!(image.section(".text").is_none());

        let rdata = image.section(".rdata").unwrap();
        let offset = image.rva_to_offset(rdata.virtual_address + 0x10).unwrap();
        assert_eq!(offset, rdata.pointer_to_raw_data as usize + 0x10);
        assert_eq!(image.rva_to_offset(0x0FFF_FFFF), None);
    }

    #[test]
    fn test_imported_libraries() {
        let data = PeBuilder::new()
            .import("KERNEL32.dll")
            .import("Galaxy64.dll")
            .build();
        let image = PeImage::parse(&data).unwrap();

        assert_eq!(image.imported_libraries(), vec!["KERNEL32.dll", "Galaxy64.dll"]);
        assert!(image.imports_library("galaxy64.DLL"));
        assert!(!image.imports_library("eossdk-win64-shipping.dll"));
    }

    #[test]
    fn test_pe32_image() {
        let data = PeBuilder::new().pe32().import("USER32.dll").build();
        let image = PeImage::parse(&data).unwrap();

        assert!(!image.is_pe32_plus());
        assert!(image.imports_library("user32.dll"));
    }
}
