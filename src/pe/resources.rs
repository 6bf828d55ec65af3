//! Version resource parsing
//!
//! Walks the resource directory to the RT_VERSION entry and decodes the
//! `VS_VERSIONINFO` block tree: the fixed file info record and the
//! `StringFileInfo` string tables. The runtime version comes from the
//! `ProductVersion` string.

use log::{debug, trace};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::pe::image::{DirectoryEntry, PeError, PeImage};
use crate::pe::map_file;
use crate::runtime::version::{VersionParseError, VersionTriple};

/// Resource type id of version resources
pub const RT_VERSION: u32 = 16;

const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;
const FIXED_FILE_INFO_SIZE: usize = 52;
const RESOURCE_DIRECTORY_SIZE: usize = 16;
const RESOURCE_ENTRY_SIZE: usize = 8;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;

#[derive(Debug)]
pub enum ResolveError {
    /// The file could not be opened or mapped
    Io { path: PathBuf, source: io::Error },
    /// The file is not a readable PE image
    Image(PeError),
    /// No RT_VERSION resource present
    NoVersionResource,
    /// Resource data is inconsistent
    Malformed(&'static str),
    /// The string tables carry no `ProductVersion`
    MissingProductVersion,
    /// `ProductVersion` is not a valid `A.B.C.D` string
    Parse(VersionParseError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            ResolveError::Image(err) => write!(f, "{err}"),
            ResolveError::NoVersionResource => write!(f, "no version resource"),
            ResolveError::Malformed(what) => write!(f, "malformed version resource ({what})"),
            ResolveError::MissingProductVersion => write!(f, "no ProductVersion string"),
            ResolveError::Parse(err) => write!(f, "bad ProductVersion: {err}"),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Io { source, .. } => Some(source),
            ResolveError::Image(err) => Some(err),
            ResolveError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PeError> for ResolveError {
    fn from(err: PeError) -> Self {
        ResolveError::Image(err)
    }
}

/// `VS_FIXEDFILEINFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedFileInfo {
    pub struc_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

impl FixedFileInfo {
    fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < FIXED_FILE_INFO_SIZE || le_u32(value, 0)? != FIXED_FILE_INFO_SIGNATURE {
            return None;
        }
        let field = |i: usize| le_u32(value, 4 * i);
        Some(Self {
            struc_version: field(1)?,
            file_version_ms: field(2)?,
            file_version_ls: field(3)?,
            product_version_ms: field(4)?,
            product_version_ls: field(5)?,
            file_flags_mask: field(6)?,
            file_flags: field(7)?,
            file_os: field(8)?,
            file_type: field(9)?,
            file_subtype: field(10)?,
            file_date_ms: field(11)?,
            file_date_ls: field(12)?,
        })
    }

    pub fn file_version(&self) -> VersionTriple {
        packed_version(self.file_version_ms, self.file_version_ls)
    }

    pub fn product_version(&self) -> VersionTriple {
        packed_version(self.product_version_ms, self.product_version_ls)
    }

    /// Log every field at debug level
    pub fn dump(&self) {
        debug!("dwSignature = {:08X}", FIXED_FILE_INFO_SIGNATURE);
        debug!("dwStrucVersion = {:08X}", self.struc_version);
        debug!("dwFileVersionMS = {:08X}", self.file_version_ms);
        debug!("dwFileVersionLS = {:08X}", self.file_version_ls);
        debug!("dwProductVersionMS = {:08X}", self.product_version_ms);
        debug!("dwProductVersionLS = {:08X}", self.product_version_ls);
        debug!("dwFileFlagsMask = {:08X}", self.file_flags_mask);
        debug!("dwFileFlags = {:08X}", self.file_flags);
        debug!("dwFileOS = {:08X}", self.file_os);
        debug!("dwFileType = {:08X}", self.file_type);
        debug!("dwFileSubtype = {:08X}", self.file_subtype);
        debug!("dwFileDateMS = {:08X}", self.file_date_ms);
        debug!("dwFileDateLS = {:08X}", self.file_date_ls);
    }
}

fn packed_version(ms: u32, ls: u32) -> VersionTriple {
    VersionTriple::new((ms >> 16) as u16, ms as u16, (ls >> 16) as u16, ls as u16)
}

/// Decoded `VS_VERSIONINFO`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionResource {
    pub fixed: Option<FixedFileInfo>,
    /// `StringFileInfo` entries in file order, across all string tables
    pub strings: Vec<(String, String)>,
}

impl VersionResource {
    /// First value stored under `key`
    pub fn string(&self, key: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Version and naming facts about an executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: VersionTriple,
    pub product_name: Option<String>,
    pub fixed: Option<FixedFileInfo>,
}

/// Resolve the declared product version of the executable at `path`
pub fn resolve_version(path: &Path) -> Result<VersionTriple, ResolveError> {
    read_version_info(path).map(|info| info.version)
}

/// Read the version resource of the executable at `path`
pub fn read_version_info(path: &Path) -> Result<VersionInfo, ResolveError> {
    let mapping = map_file(path).map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let image = PeImage::parse(&mapping)?;
    let info = version_info(&image)?;
    debug!(
        "Resolved {} version {} (product name {:?})",
        path.display(),
        info.version,
        info.product_name
    );
    Ok(info)
}

/// Decode the product version and name of a parsed image
pub fn version_info(image: &PeImage<'_>) -> Result<VersionInfo, ResolveError> {
    let resource = read_version_resource(image)?;
    if let Some(fixed) = &resource.fixed {
        fixed.dump();
    }

    let text = resource
        .string("ProductVersion")
        .ok_or(ResolveError::MissingProductVersion)?;
    let version = text.parse::<VersionTriple>().map_err(ResolveError::Parse)?;

    Ok(VersionInfo {
        version,
        product_name: resource.string("ProductName").map(str::to_string),
        fixed: resource.fixed,
    })
}

/// Locate and decode the RT_VERSION resource of `image`
pub fn read_version_resource(image: &PeImage<'_>) -> Result<VersionResource, ResolveError> {
    let blob = version_resource_bytes(image)?;
    parse_version_info(blob)
}

/// Raw `VS_VERSIONINFO` bytes: RT_VERSION, then the first name and the first
/// language below it.
pub fn version_resource_bytes<'a>(image: &PeImage<'a>) -> Result<&'a [u8], ResolveError> {
    let directory = image
        .directory(DirectoryEntry::Resource)
        .ok_or(ResolveError::NoVersionResource)?;
    let start = image
        .rva_to_offset(directory.virtual_address)
        .ok_or(ResolveError::Malformed("resource directory outside sections"))?;
    let available = image.data().len().saturating_sub(start);
    let rsrc = image.bytes_at(start, (directory.size as usize).min(available))?;

    let type_entry = find_entry(rsrc, 0, Some(RT_VERSION))?.ok_or(ResolveError::NoVersionResource)?;
    let name_dir = subdirectory(type_entry)?;
    let name_entry = find_entry(rsrc, name_dir, None)?.ok_or(ResolveError::NoVersionResource)?;
    let language_dir = subdirectory(name_entry)?;
    let data_entry = find_entry(rsrc, language_dir, None)?.ok_or(ResolveError::NoVersionResource)?;
    if data_entry & SUBDIRECTORY_FLAG != 0 {
        return Err(ResolveError::Malformed("language entry is a directory"));
    }

    let data_entry = data_entry as usize;
    let data_rva = le_u32(rsrc, data_entry).ok_or(ResolveError::Malformed("data entry truncated"))?;
    let data_size = le_u32(rsrc, data_entry + 4).ok_or(ResolveError::Malformed("data entry truncated"))?;
    let offset = image
        .rva_to_offset(data_rva)
        .ok_or(ResolveError::Malformed("version data outside sections"))?;

    trace!(
        "Version resource at RVA 0x{:x} (offset 0x{:x}, {} bytes)",
        data_rva, offset, data_size
    );
    Ok(image.bytes_at(offset, data_size as usize)?)
}

/// Find an entry in the resource directory at `dir` (relative to the
/// resource section start). With `id`, match that integer id; otherwise
/// take the first entry. Returns the raw OffsetToData field.
fn find_entry(rsrc: &[u8], dir: usize, id: Option<u32>) -> Result<Option<u32>, ResolveError> {
    let (Some(named), Some(ids)) = (le_u16(rsrc, dir + 12), le_u16(rsrc, dir + 14)) else {
        return Err(ResolveError::Malformed("resource directory truncated"));
    };
    let (named, ids) = (named as usize, ids as usize);

    let entries = dir + RESOURCE_DIRECTORY_SIZE;
    let (first, count) = match id {
        // Integer ids follow the named entries
        Some(_) => (named, ids),
        None => (0, named + ids),
    };

    for index in first..first + count {
        let entry = entries + index * RESOURCE_ENTRY_SIZE;
        let (Some(name), Some(target)) = (le_u32(rsrc, entry), le_u32(rsrc, entry + 4)) else {
            return Err(ResolveError::Malformed("resource entry truncated"));
        };
        match id {
            Some(wanted) if name != wanted => continue,
            _ => return Ok(Some(target)),
        }
    }
    Ok(None)
}

fn subdirectory(target: u32) -> Result<usize, ResolveError> {
    if target & SUBDIRECTORY_FLAG == 0 {
        return Err(ResolveError::Malformed("expected a resource subdirectory"));
    }
    Ok((target & !SUBDIRECTORY_FLAG) as usize)
}

/// One node of the `VS_VERSIONINFO` tree
#[derive(Debug)]
struct Block<'a> {
    key: String,
    value: &'a [u8],
    children: &'a [u8],
    length: usize,
}

impl<'a> Block<'a> {
    fn parse(buf: &'a [u8]) -> Option<Self> {
        let length = le_u16(buf, 0)? as usize;
        if length < 6 || length > buf.len() {
            return None;
        }
        let block = &buf[..length];
        let value_length = le_u16(block, 2)? as usize;
        let value_type = le_u16(block, 4)?;

        let mut units = Vec::new();
        let mut cursor = 6;
        loop {
            let unit = le_u16(block, cursor)?;
            cursor += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let key = String::from_utf16_lossy(&units);

        // Text values count UTF-16 units, binary values count bytes
        let value_bytes = if value_type == 1 { value_length * 2 } else { value_length };
        let value_start = align4(cursor).min(length);
        let value_end = (value_start + value_bytes).min(length);
        let children_start = align4(value_end).min(length);

        Some(Self {
            key,
            value: &block[value_start..value_end],
            children: &block[children_start..],
            length,
        })
    }

    fn children(&self) -> Vec<Block<'a>> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + 6 <= self.children.len() {
            let Some(child) = Block::parse(&self.children[offset..]) else {
                break;
            };
            offset += align4(child.length);
            out.push(child);
        }
        out
    }

    fn text(&self) -> String {
        let units: Vec<u16> = self
            .value
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }
}

/// Decode a raw `VS_VERSIONINFO` blob
pub fn parse_version_info(blob: &[u8]) -> Result<VersionResource, ResolveError> {
    let root = Block::parse(blob).ok_or(ResolveError::Malformed("bad VS_VERSIONINFO header"))?;
    if root.key != "VS_VERSION_INFO" {
        return Err(ResolveError::Malformed("unexpected root key"));
    }

    let mut resource = VersionResource {
        fixed: FixedFileInfo::parse(root.value),
        strings: Vec::new(),
    };

    for child in root.children() {
        if child.key != "StringFileInfo" {
            trace!("Skipping version block {}", child.key);
            continue;
        }
        for table in child.children() {
            trace!("String table {}", table.key);
            for entry in table.children() {
                let text = entry.text();
                resource.strings.push((entry.key, text));
            }
        }
    }

    Ok(resource)
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

fn le_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
