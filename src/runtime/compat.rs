//! Compatibility decision table
//!
//! `evaluate` combines the scanned variant and version with the runtime this
//! loader build expects, and yields a verdict plus the companion module
//! suffix. It is a pure function; rules are checked in order and the first
//! match wins.

use serde::Serialize;

use crate::defaults::LoaderConfig;
use crate::runtime::variant::{ExecutableVariant, RuntimeFamily, VariantProfile};
use crate::runtime::version::VersionTriple;

/// Runtime build this loader targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRuntime {
    /// Expected version; the sub-type tag carries the family
    pub version: VersionTriple,
    pub family: RuntimeFamily,
    /// Loader tracks a pre-release (beta) channel of the runtime
    pub prerelease: bool,
    /// Latest stable runtime release, used for the channel-switch hint
    pub last_stable: VersionTriple,
}

impl ExpectedRuntime {
    pub fn new(version: VersionTriple, family: RuntimeFamily) -> Self {
        let version = version.with_sub(family.sub_tag());
        Self {
            version,
            family,
            prerelease: false,
            last_stable: version,
        }
    }

    pub fn prerelease(mut self, last_stable: VersionTriple) -> Self {
        self.prerelease = true;
        self.last_stable = last_stable;
        self
    }
}

/// What the scanner and version resolver found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScannedRuntime {
    pub variant: ExecutableVariant,
    pub version: VersionTriple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Runtime,
    Editor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CompatibilityVerdict {
    Compatible,
    WrongVariant {
        expected: RuntimeFamily,
        found: ExecutableVariant,
    },
    TooOld {
        /// Scanned build is the last stable release while the loader
        /// targets the pre-release channel
        switch_channel: bool,
    },
    TooNew,
    Unsupported {
        variant: ExecutableVariant,
        editor: bool,
    },
}

/// Verdict plus the module suffix (present only when compatible)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub verdict: CompatibilityVerdict,
    pub dll_suffix: Option<String>,
}

impl MatchOutcome {
    pub fn is_compatible(&self) -> bool {
        self.verdict == CompatibilityVerdict::Compatible
    }
}

/// Whether a loader built for `family` can serve `profile`.
///
/// Builds outside the family are admitted when they get a dedicated module.
pub fn admits(family: RuntimeFamily, profile: &dyn VariantProfile) -> bool {
    profile.supported()
        && match profile.storefront() {
            None => true,
            Some(storefront) => storefront == family || profile.module_suffix().is_some(),
        }
}

/// Module suffix for a compatible build; empty for editor targets
pub fn module_suffix(scanned: &ScannedRuntime, kind: TargetKind) -> String {
    match kind {
        TargetKind::Editor => String::new(),
        TargetKind::Runtime => format!(
            "{}_{}_{}{}",
            scanned.version.major(),
            scanned.version.minor(),
            scanned.version.build(),
            scanned.variant.profile().module_suffix().unwrap_or("")
        ),
    }
}

pub fn evaluate(scanned: &ScannedRuntime, expected: &ExpectedRuntime, kind: TargetKind) -> MatchOutcome {
    let profile = scanned.variant.profile();
    let found = scanned.version.release();
    let wanted = expected.version.release();
    let conflicting_storefront = profile
        .storefront()
        .is_some_and(|storefront| storefront != expected.family);

    let verdict = if found == wanted && admits(expected.family, profile) {
        if kind == TargetKind::Editor && !profile.supports_editor() {
            CompatibilityVerdict::Unsupported {
                variant: scanned.variant,
                editor: true,
            }
        } else {
            CompatibilityVerdict::Compatible
        }
    } else if found != wanted && conflicting_storefront {
        CompatibilityVerdict::WrongVariant {
            expected: expected.family,
            found: scanned.variant,
        }
    } else if found < wanted {
        CompatibilityVerdict::TooOld {
            switch_channel: expected.prerelease && found == expected.last_stable.release(),
        }
    } else if found > wanted {
        CompatibilityVerdict::TooNew
    } else if !profile.supported() {
        CompatibilityVerdict::Unsupported {
            variant: scanned.variant,
            editor: kind == TargetKind::Editor,
        }
    } else {
        CompatibilityVerdict::WrongVariant {
            expected: expected.family,
            found: scanned.variant,
        }
    };

    let dll_suffix = (verdict == CompatibilityVerdict::Compatible).then(|| module_suffix(scanned, kind));
    MatchOutcome { verdict, dll_suffix }
}

impl CompatibilityVerdict {
    /// User-facing explanation, `None` for a compatible build
    pub fn message(&self, scanned: &ScannedRuntime, config: &LoaderConfig) -> Option<String> {
        let runtime = scanned.version.release_string();
        let title = &config.runtime_title;
        let loader = &config.product_name;
        let loader_version = &config.loader_version;

        let text = match self {
            CompatibilityVerdict::Compatible => return None,
            CompatibilityVerdict::WrongVariant { expected, found } => format!(
                "This version of {loader} is compatible with the {expected} version of the game.\n\
                 You have the {found} version of the game. Please download the correct version from the website.\n\
                 Runtime: {runtime}\n\
                 {loader}: {loader_version}"
            ),
            CompatibilityVerdict::TooOld { switch_channel: true } => format!(
                "You are using the version of {loader} intended for the Steam beta branch ({loader_version}).\n\
                 Download and install the non-beta branch version ({}) from the website.",
                config.stable_loader_version
            ),
            CompatibilityVerdict::TooOld { switch_channel: false } => {
                let channel = if config.expected.prerelease {
                    "latest beta version"
                } else {
                    "latest version"
                };
                format!(
                    "You are using {title} version {runtime}, which is out of date and incompatible \
                     with this version of {loader} ({loader_version}). Update to the {channel}."
                )
            }
            CompatibilityVerdict::TooNew => format!(
                "You are using a newer version of {title} than this version of {loader} supports.\n\
                 If this version just came out, please be patient while we update our code.\n\
                 In the meantime, please check the website for updates.\n\
                 Runtime: {runtime}\n\
                 {loader}: {loader_version}"
            ),
            // Epic builds are refused before the target kind is considered
            CompatibilityVerdict::Unsupported {
                variant: variant @ ExecutableVariant::Epic,
                ..
            } => variant.profile().unsupported_reason(title),
            CompatibilityVerdict::Unsupported { editor: true, .. } => {
                "Unsupported editor executable type.".to_string()
            }
            CompatibilityVerdict::Unsupported { variant, editor: false } => {
                variant.profile().unsupported_reason(title)
            }
        };
        Some(text)
    }
}
