//! Distribution variants of the runtime executable
//!
//! Each `ExecutableVariant` has a `VariantProfile` describing how the loader
//! treats it: which storefront it belongs to, the module name suffix, whether
//! it can be injected, and the environment the storefront expects at launch.

use serde::Serialize;
use std::fmt;

/// Distribution build of the runtime, as classified by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableVariant {
    Unknown,
    Normal,
    Steam,
    Gog,
    Epic,
    WinStore,
    Packed,
}

impl ExecutableVariant {
    pub const ALL: [ExecutableVariant; 7] = [
        ExecutableVariant::Unknown,
        ExecutableVariant::Normal,
        ExecutableVariant::Steam,
        ExecutableVariant::Gog,
        ExecutableVariant::Epic,
        ExecutableVariant::WinStore,
        ExecutableVariant::Packed,
    ];

    /// Behavior profile for this variant
    pub fn profile(self) -> &'static dyn VariantProfile {
        match self {
            ExecutableVariant::Unknown => &UnknownProfile,
            ExecutableVariant::Normal => &NormalProfile,
            ExecutableVariant::Steam => &SteamProfile,
            ExecutableVariant::Gog => &GogProfile,
            ExecutableVariant::Epic => &EpicProfile,
            ExecutableVariant::WinStore => &WinStoreProfile,
            ExecutableVariant::Packed => &PackedProfile,
        }
    }
}

impl fmt::Display for ExecutableVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().display_name())
    }
}

/// Storefront family a loader build targets.
///
/// Encoded in the sub-type tag of an expected `VersionTriple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFamily {
    Steam,
    Gog,
    MsStore,
}

impl RuntimeFamily {
    pub const fn sub_tag(self) -> u16 {
        match self {
            RuntimeFamily::Steam => 0,
            RuntimeFamily::Gog => 1,
            RuntimeFamily::MsStore => 2,
        }
    }

    pub fn from_sub_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(RuntimeFamily::Steam),
            1 => Some(RuntimeFamily::Gog),
            2 => Some(RuntimeFamily::MsStore),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            RuntimeFamily::Steam => "Steam",
            RuntimeFamily::Gog => "GOG",
            RuntimeFamily::MsStore => "MS Store",
        }
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-variant loader behavior
pub trait VariantProfile: fmt::Debug + Sync {
    fn variant(&self) -> ExecutableVariant;

    fn display_name(&self) -> &'static str;

    /// Storefront that ships this build, if any
    fn storefront(&self) -> Option<RuntimeFamily> {
        None
    }

    /// Literal appended to the versioned module suffix, e.g. `_gog`
    fn module_suffix(&self) -> Option<&'static str> {
        None
    }

    fn supported(&self) -> bool {
        true
    }

    /// Message shown when the variant cannot be loaded at all
    fn unsupported_reason(&self, _runtime_title: &str) -> String {
        "Unknown executable type.".to_string()
    }

    fn supports_editor(&self) -> bool {
        self.supported()
    }

    fn injectable(&self) -> bool {
        self.supported()
    }

    /// Environment variables the storefront expects before the runtime starts
    fn launch_environment(&self, _app_id: &str, _skip_launcher: bool) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[derive(Debug)]
struct UnknownProfile;

impl VariantProfile for UnknownProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Unknown
    }

    fn display_name(&self) -> &'static str {
        "unknown"
    }

    fn supported(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct NormalProfile;

impl VariantProfile for NormalProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Normal
    }

    fn display_name(&self) -> &'static str {
        "normal"
    }
}

#[derive(Debug)]
struct SteamProfile;

impl VariantProfile for SteamProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Steam
    }

    fn display_name(&self) -> &'static str {
        "Steam"
    }

    fn storefront(&self) -> Option<RuntimeFamily> {
        Some(RuntimeFamily::Steam)
    }

    fn launch_environment(&self, app_id: &str, skip_launcher: bool) -> Vec<(String, String)> {
        let mut env = vec![("SteamGameId".to_string(), app_id.to_string())];
        if skip_launcher {
            env.push(("SteamAppID".to_string(), app_id.to_string()));
        }
        env
    }
}

#[derive(Debug)]
struct GogProfile;

impl VariantProfile for GogProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Gog
    }

    fn display_name(&self) -> &'static str {
        "GOG"
    }

    fn storefront(&self) -> Option<RuntimeFamily> {
        Some(RuntimeFamily::Gog)
    }

    fn module_suffix(&self) -> Option<&'static str> {
        Some("_gog")
    }
}

#[derive(Debug)]
struct EpicProfile;

impl VariantProfile for EpicProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Epic
    }

    fn display_name(&self) -> &'static str {
        "Epic Games Store"
    }

    fn supported(&self) -> bool {
        false
    }

    fn unsupported_reason(&self, runtime_title: &str) -> String {
        format!("The Epic Store version of {runtime_title} is not supported.")
    }
}

#[derive(Debug)]
struct WinStoreProfile;

impl VariantProfile for WinStoreProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::WinStore
    }

    fn display_name(&self) -> &'static str {
        "MS Store"
    }

    fn storefront(&self) -> Option<RuntimeFamily> {
        Some(RuntimeFamily::MsStore)
    }

    fn module_suffix(&self) -> Option<&'static str> {
        Some("_winstore")
    }
}

#[derive(Debug)]
struct PackedProfile;

impl VariantProfile for PackedProfile {
    fn variant(&self) -> ExecutableVariant {
        ExecutableVariant::Packed
    }

    fn display_name(&self) -> &'static str {
        "packed"
    }

    fn supported(&self) -> bool {
        false
    }

    fn unsupported_reason(&self, runtime_title: &str) -> String {
        format!("Packed versions of {runtime_title} are not supported.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_round_trip_variant() {
        for variant in ExecutableVariant::ALL {
            assert_eq!(variant.profile().variant(), variant);
        }
    }

    #[test]
    fn test_unsupported_set() {
        let unsupported: Vec<_> = ExecutableVariant::ALL
            .into_iter()
            .filter(|v| !v.profile().supported())
            .collect();
        assert_eq!(
            unsupported,
            vec![
                ExecutableVariant::Unknown,
                ExecutableVariant::Epic,
                ExecutableVariant::Packed
            ]
        );
    }

    #[test]
    fn test_injectable_and_editor_support() {
        for variant in [
            ExecutableVariant::Steam,
            ExecutableVariant::Normal,
            ExecutableVariant::Gog,
            ExecutableVariant::WinStore,
        ] {
            assert!(variant.profile().injectable(), "{variant} should be injectable");
            assert!(variant.profile().supports_editor());
        }
        assert!(!ExecutableVariant::Packed.profile().injectable());
        assert!(!ExecutableVariant::Unknown.profile().supports_editor());
    }

    #[test]
    fn test_steam_launch_environment() {
        let profile = ExecutableVariant::Steam.profile();
        assert_eq!(
            profile.launch_environment("2623190", false),
            vec![("SteamGameId".to_string(), "2623190".to_string())]
        );
        assert_eq!(profile.launch_environment("2623190", true).len(), 2);
        assert!(
            ExecutableVariant::Gog
                .profile()
                .launch_environment("2623190", true)
                .is_empty()
        );
    }

    #[test]
    fn test_family_sub_tags() {
        for family in [RuntimeFamily::Steam, RuntimeFamily::Gog, RuntimeFamily::MsStore] {
            assert_eq!(RuntimeFamily::from_sub_tag(family.sub_tag()), Some(family));
        }
        assert_eq!(RuntimeFamily::from_sub_tag(9), None);
    }
}
