//! Packed runtime version numbers
//!
//! A `VersionTriple` stores major, minor and build plus a sub-type tag as four
//! 16-bit fields in one `u64`, most significant first. The textual form is
//! `"A.B.C.D"`.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Packed `(major, minor, build, sub)` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTriple(u64);

impl VersionTriple {
    pub const fn new(major: u16, minor: u16, build: u16, sub: u16) -> Self {
        Self(((major as u64) << 48) | ((minor as u64) << 32) | ((build as u64) << 16) | sub as u64)
    }

    pub const fn from_packed(packed: u64) -> Self {
        Self(packed)
    }

    pub const fn packed(self) -> u64 {
        self.0
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub const fn minor(self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub const fn build(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn sub(self) -> u16 {
        self.0 as u16
    }

    /// Same version with the sub-type tag cleared.
    ///
    /// Compatibility decisions compare release versions only.
    pub const fn release(self) -> Self {
        Self(self.0 & !0xFFFF)
    }

    pub const fn with_sub(self, sub: u16) -> Self {
        Self(self.release().0 | sub as u64)
    }

    /// Compact 32-bit form embedded in companion modules
    /// (`major:8 | minor:12 | build:12`).
    pub const fn compact(self) -> u32 {
        ((self.major() as u32 & 0xFF) << 24)
            | ((self.minor() as u32 & 0xFFF) << 12)
            | (self.build() as u32 & 0xFFF)
    }

    /// `"major.minor.build"` as shown to users
    pub fn release_string(self) -> String {
        format!("{}.{}.{}", self.major(), self.minor(), self.build())
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major(),
            self.minor(),
            self.build(),
            self.sub()
        )
    }
}

impl Serialize for VersionTriple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors from parsing an `"A.B.C.D"` version string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// Not exactly four dot-separated components
    ComponentCount(usize),
    /// A component is not a non-negative decimal integer
    InvalidComponent(String),
    /// A component does not fit in 16 bits
    OutOfRange(u64),
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionParseError::ComponentCount(n) => {
                write!(f, "expected 4 version components, found {n}")
            }
            VersionParseError::InvalidComponent(c) => write!(f, "invalid version component '{c}'"),
            VersionParseError::OutOfRange(v) => write!(f, "version component {v} exceeds 65535"),
        }
    }
}

impl std::error::Error for VersionParseError {}

impl FromStr for VersionTriple {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(VersionParseError::ComponentCount(parts.len()));
        }

        let mut fields = [0u16; 4];
        for (field, part) in fields.iter_mut().zip(&parts) {
            let text = part.trim();
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::InvalidComponent(text.to_string()));
            }
            // Digits only, so the only failure left is overflow
            let value = text.parse::<u64>().unwrap_or(u64::MAX);
            *field = u16::try_from(value).map_err(|_| VersionParseError::OutOfRange(value))?;
        }

        Ok(Self::new(fields[0], fields[1], fields[2], fields[3]))
    }
}
