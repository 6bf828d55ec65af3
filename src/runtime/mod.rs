//! Runtime identity: versions, distribution variants and compatibility rules

pub mod compat;
pub mod variant;
pub mod version;

pub use compat::{
    CompatibilityVerdict, ExpectedRuntime, MatchOutcome, ScannedRuntime, TargetKind, evaluate,
};
pub use variant::{ExecutableVariant, RuntimeFamily, VariantProfile};
pub use version::{VersionParseError, VersionTriple};
