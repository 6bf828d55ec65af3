//! Launch orchestration
//!
//! `Orchestrator::launch` walks the runtime through
//! `Idle -> TargetResolved -> ProcessCreatedSuspended -> ModuleValidated ->
//! Injected -> Resumed -> Completed`. Any failure after the process exists
//! terminates it before the error is returned; an incompatible runtime is
//! rejected before a process is created.

pub mod inject;
pub mod module;
pub mod process;
pub mod signer;
pub mod target;

use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ConfigProvider;
use crate::defaults::{DEFAULT_CONFIG_FILE, LoaderConfig};
use crate::exceptions::{LoaderError, Result};
use crate::pe::read_version_info;
use crate::pe::scanner::{Scanner, recover_scan_error};
use crate::runtime::{ExecutableVariant, MatchOutcome, ScannedRuntime, TargetKind, VersionTriple, evaluate};
use crate::utils::path_contains_any;

pub use inject::{Injector, UnsupportedInjector, default_injector};
pub use module::{ModuleDescriptor, module_path, validate_module};
pub use process::{PriorityClass, ProcessHandle, ProcessSpawner, SpawnError, SpawnOptions, default_spawner};
pub use signer::{Ed25519Signer, Signer, UncheckedSigner};
pub use target::{ResolvedTarget, TargetResolver};

/// One run of the loader, built from the command line
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub alt_exe: Option<PathBuf>,
    pub alt_dll: Option<PathBuf>,
    pub affinity: Option<u64>,
    pub priority: Option<PriorityClass>,
    pub wait_for_close: bool,
    pub no_timeout: bool,
    pub editor: bool,
    /// Stop once the runtime is identified as compatible
    pub identify_only: bool,
    pub skip_launcher: bool,
    /// File name of the running loader, for renamed-install detection
    pub loader_exe_name: Option<String>,
}

impl LaunchRequest {
    pub fn target_kind(&self) -> TargetKind {
        if self.editor {
            TargetKind::Editor
        } else {
            TargetKind::Runtime
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchState {
    Idle,
    TargetResolved,
    ProcessCreatedSuspended,
    ModuleValidated,
    Injected,
    Resumed,
    Completed,
    Terminated,
}

/// What the scanner and version resolver learned about the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeIdentity {
    pub path: PathBuf,
    pub variant: ExecutableVariant,
    pub version: VersionTriple,
    pub product_name: Option<String>,
}

impl RuntimeIdentity {
    pub fn scanned(&self) -> ScannedRuntime {
        ScannedRuntime {
            variant: self.variant,
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub state: LaunchState,
    pub identity: RuntimeIdentity,
    pub outcome: MatchOutcome,
    pub module: Option<ModuleDescriptor>,
    pub process_id: Option<u32>,
    pub exit_code: Option<u32>,
}

#[derive(Debug)]
pub struct Orchestrator<'a> {
    config: &'a LoaderConfig,
    options: &'a dyn ConfigProvider,
    spawner: &'a dyn ProcessSpawner,
    injector: &'a dyn Injector,
    signer: &'a dyn Signer,
    scanner: Scanner,
    state: LaunchState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a LoaderConfig,
        options: &'a dyn ConfigProvider,
        spawner: &'a dyn ProcessSpawner,
        injector: &'a dyn Injector,
        signer: &'a dyn Signer,
    ) -> Self {
        Self {
            config,
            options,
            spawner,
            injector,
            signer,
            scanner: Scanner::from_config(config),
            state: LaunchState::Idle,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    fn transition(&mut self, next: LaunchState) {
        debug!("🚦 {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Classify the executable at `path` and read its version
    pub fn identify(&self, path: &Path) -> Result<RuntimeIdentity> {
        let variant = match self.scanner.scan_file(path) {
            Ok(variant) => variant,
            Err(e) => match recover_scan_error(&e, &self.config.store_path_markers) {
                Some(variant) => variant,
                None => return Err(e.into()),
            },
        };

        let (version, product_name) = match read_version_info(path) {
            Ok(info) => (info.version, info.product_name),
            Err(e) if path_contains_any(path, &[&self.config.store_runtime_marker]) => {
                warn!(
                    "Couldn't read version of store executable ({}), using {}",
                    e, self.config.store_fallback_version
                );
                (self.config.store_fallback_version, None)
            }
            Err(e) => return Err(e.into()),
        };
        info!("🔎 {} is a {} build, version {}", path.display(), variant, version);

        if product_name.as_deref() == Some(self.config.product_name.as_str()) {
            return Err(LoaderError::Identification(format!(
                "Found a {} component ({}) instead of the game executable.",
                self.config.product_name,
                path.display()
            )));
        }

        Ok(RuntimeIdentity {
            path: path.to_path_buf(),
            variant,
            version,
            product_name,
        })
    }

    /// Resolve, identify and match the target without creating a process
    fn prepare(&mut self, request: &LaunchRequest) -> Result<(RuntimeIdentity, MatchOutcome)> {
        let target = TargetResolver::new(self.config, self.options)
            .resolve(request.alt_exe.as_deref(), request.loader_exe_name.as_deref())?;

        let checked = self.identify(&target.path).and_then(|identity| {
            let outcome = evaluate(&identity.scanned(), &self.config.expected, request.target_kind());
            match outcome.verdict.message(&identity.scanned(), self.config) {
                Some(message) => Err(LoaderError::Incompatible(message)),
                None => Ok((identity, outcome)),
            }
        });

        match checked {
            Ok(prepared) => {
                self.transition(LaunchState::TargetResolved);
                Ok(prepared)
            }
            Err(e) if target.custom_name => Err(self.with_custom_name_hint(e)),
            Err(e) => Err(e),
        }
    }

    fn with_custom_name_hint(&self, err: LoaderError) -> LoaderError {
        let hint = format!(
            "You have customized the runtime name via {}'s configuration file. Version errors can usually \
             be fixed by removing the {} setting from {}.",
            self.config.product_name,
            target::RUNTIME_NAME_KEY,
            DEFAULT_CONFIG_FILE
        );
        match err {
            LoaderError::Identification(msg) => LoaderError::Identification(format!("{msg}\n{hint}")),
            LoaderError::Incompatible(msg) => LoaderError::Incompatible(format!("{msg}\n{hint}")),
            other => other,
        }
    }

    /// Terminate a process that must never run
    fn abort(&mut self, process: &mut ProcessHandle) {
        error!("Terminating process {}", process.id());
        if let Err(e) = process.terminate() {
            error!("Couldn't terminate process {}: {}", process.id(), e);
        }
        self.transition(LaunchState::Terminated);
    }

    pub fn launch(&mut self, request: &LaunchRequest) -> Result<LaunchReport> {
        self.state = LaunchState::Idle;
        let (identity, outcome) = self.prepare(request)?;

        let mut report = LaunchReport {
            state: self.state,
            identity,
            outcome,
            module: None,
            process_id: None,
            exit_code: None,
        };
        if request.identify_only {
            info!("Runtime identified, not launching");
            return Ok(report);
        }

        let profile = report.identity.variant.profile();
        let options = SpawnOptions {
            priority: request.priority,
            affinity: request.affinity,
            environment: profile.launch_environment(&self.config.steam_app_id, request.skip_launcher),
        };
        info!("Launching {}", report.identity.path.display());
        let mut process = ProcessHandle::new(self.spawner.spawn_suspended(&report.identity.path, &options)?);
        report.process_id = Some(process.id());
        self.transition(LaunchState::ProcessCreatedSuspended);

        let suffix = report.outcome.dll_suffix.as_deref().unwrap_or("");
        let module_path = module_path(self.config, request.target_kind(), suffix, request.alt_dll.as_deref());
        let module = match validate_module(&module_path, report.identity.version, self.config, self.signer) {
            Ok(module) => module,
            Err(e) => {
                self.abort(&mut process);
                return Err(e);
            }
        };
        self.transition(LaunchState::ModuleValidated);

        if !profile.injectable() {
            self.abort(&mut process);
            return Err(LoaderError::InjectionFailed(format!(
                "{} builds cannot be injected",
                report.identity.variant
            )));
        }
        if !self.injector.inject(process.process(), &module.path, !request.no_timeout) {
            self.abort(&mut process);
            return Err(LoaderError::InjectionFailed(module.path.display().to_string()));
        }
        report.module = Some(module);
        self.transition(LaunchState::Injected);

        match process.resume() {
            Ok(0) | Err(_) => {
                warn!("Something has started the runtime outside of the loader's control.");
                warn!("{} will probably not function correctly.", self.config.product_name);
                warn!("Try running the loader as an administrator, or check for conflicts with a virus scanner.");
            }
            Ok(previous) => debug!("Resumed main thread (suspend count was {})", previous),
        }
        self.transition(LaunchState::Resumed);

        if request.wait_for_close {
            info!("Waiting for process {} to exit", process.id());
            match process.wait() {
                Ok(code) => report.exit_code = Some(code),
                Err(e) => warn!("Couldn't wait for process {}: {}", process.id(), e),
            }
        }

        self.transition(LaunchState::Completed);
        report.state = self.state;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::inject::fake::FakeInjector;
    use super::process::fake::FakeSpawner;
    use super::*;
    use crate::config::JsonConfig;
    use crate::pe::exports::ModuleMetadata;
    use crate::pe::test_support::PeBuilder;
    use crate::runtime::CompatibilityVerdict;
    use std::fs;
    use tempfile::TempDir;

    const RUNTIME: VersionTriple = VersionTriple::new(0, 411, 140, 0);

    struct Fixture {
        _temp_dir: TempDir,
        config: LoaderConfig,
        options: JsonConfig,
        spawner: FakeSpawner,
        injector: FakeInjector,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = LoaderConfig::for_directory(temp_dir.path());
            Self {
                _temp_dir: temp_dir,
                config,
                options: JsonConfig::default(),
                spawner: FakeSpawner::default(),
                injector: FakeInjector::new(true),
            }
        }

        fn write_runtime(&self, name: &str, builder: PeBuilder) -> PathBuf {
            let path = self.config.runtime_directory.join(name);
            fs::write(&path, builder.build()).unwrap();
            path
        }

        fn write_steam_runtime(&self, version: &str) -> PathBuf {
            let name = self.config.default_runtime_name.clone();
            self.write_runtime(&name, PeBuilder::new().section(".bind").product_version(version))
        }

        fn write_module(&self, name: &str, runtime: VersionTriple) -> PathBuf {
            let record = ModuleMetadata {
                data_version: 1,
                runtime_version: runtime.compact(),
            };
            let path = self.config.runtime_directory.join(name);
            fs::write(&path, PeBuilder::new().export("XSECore_Version", &record.to_bytes()).build()).unwrap();
            path
        }

        fn launch(&self, request: &LaunchRequest) -> Result<LaunchReport> {
            Orchestrator::new(&self.config, &self.options, &self.spawner, &self.injector, &UncheckedSigner)
                .launch(request)
        }
    }

    #[test]
    fn test_successful_launch() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");
        let module = fixture.write_module("xse64_0_411_140.dll", RUNTIME);

        let report = fixture.launch(&LaunchRequest::default()).unwrap();
        assert_eq!(report.state, LaunchState::Completed);
        assert_eq!(report.identity.variant, ExecutableVariant::Steam);
        assert_eq!(report.module.as_ref().map(|m| m.path.clone()), Some(module.clone()));
        assert_eq!(report.process_id, Some(4242));

        let log = fixture.spawner.log.borrow();
        assert_eq!(log.spawned.len(), 1);
        assert_eq!(
            log.spawned[0].1.environment,
            vec![("SteamGameId".to_string(), "2623190".to_string())]
        );
        assert_eq!(log.resumed, 1);
        assert_eq!(log.terminated, 0);
        assert_eq!(log.released, 1);
        assert!(log.running);
        assert_eq!(*fixture.injector.calls.borrow(), vec![(module, true)]);
    }

    #[test]
    fn test_launch_options_are_forwarded() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");
        fixture.write_module("xse64_0_411_140.dll", RUNTIME);

        let request = LaunchRequest {
            priority: Some(PriorityClass::High),
            affinity: Some(0b1010),
            skip_launcher: true,
            no_timeout: true,
            wait_for_close: true,
            ..LaunchRequest::default()
        };
        let report = fixture.launch(&request).unwrap();
        assert_eq!(report.exit_code, Some(0));

        let log = fixture.spawner.log.borrow();
        let options = &log.spawned[0].1;
        assert_eq!(options.priority, Some(PriorityClass::High));
        assert_eq!(options.affinity, Some(0b1010));
        assert_eq!(options.environment.len(), 2);
        assert_eq!(log.waited, 1);
        assert!(!fixture.injector.calls.borrow()[0].1);
    }

    #[test]
    fn test_incompatible_runtime_never_spawns() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.139.0");

        let err = fixture.launch(&LaunchRequest::default()).unwrap_err();
        assert!(matches!(err, LoaderError::Incompatible(_)));
        assert!(err.to_string().contains("out of date"));
        assert!(fixture.spawner.log.borrow().spawned.is_empty());
    }

    #[test]
    fn test_missing_module_terminates_process() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");

        let mut orchestrator = Orchestrator::new(
            &fixture.config,
            &fixture.options,
            &fixture.spawner,
            &fixture.injector,
            &UncheckedSigner,
        );
        let err = orchestrator.launch(&LaunchRequest::default()).unwrap_err();
        assert!(matches!(err, LoaderError::ModuleRejected(_)));
        assert_eq!(orchestrator.state(), LaunchState::Terminated);

        let log = fixture.spawner.log.borrow();
        assert_eq!(log.terminated, 1);
        assert_eq!(log.resumed, 0);
        assert_eq!(log.released, 1);
        assert!(!log.running);
        assert!(fixture.injector.calls.borrow().is_empty());
    }

    #[test]
    fn test_failed_injection_terminates_process() {
        let mut fixture = Fixture::new();
        fixture.injector = FakeInjector::new(false);
        fixture.write_steam_runtime("0.411.140.0");
        fixture.write_module("xse64_0_411_140.dll", RUNTIME);

        let err = fixture.launch(&LaunchRequest::default()).unwrap_err();
        assert!(err.to_string().starts_with("Couldn't inject DLL"));

        let log = fixture.spawner.log.borrow();
        assert_eq!(log.terminated, 1);
        assert_eq!(log.resumed, 0);
        assert!(!log.running);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let mut fixture = Fixture::new();
        fixture.spawner.fail_with = Some(5);
        fixture.write_steam_runtime("0.411.140.0");
        fixture.write_module("xse64_0_411_140.dll", RUNTIME);

        let err = fixture.launch(&LaunchRequest::default()).unwrap_err();
        assert!(matches!(err, LoaderError::Spawn(_)));
        assert!(err.to_string().starts_with("Access denied when trying to launch"));
        assert!(fixture.injector.calls.borrow().is_empty());
    }

    #[test]
    fn test_resume_failure_is_only_a_warning() {
        let mut fixture = Fixture::new();
        fixture.spawner.fail_resume = true;
        fixture.write_steam_runtime("0.411.140.0");
        fixture.write_module("xse64_0_411_140.dll", RUNTIME);

        let report = fixture.launch(&LaunchRequest::default()).unwrap();
        assert_eq!(report.state, LaunchState::Completed);
        assert_eq!(fixture.spawner.log.borrow().terminated, 0);
    }

    #[test]
    fn test_identify_only_stops_before_spawning() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");

        let request = LaunchRequest {
            identify_only: true,
            ..LaunchRequest::default()
        };
        let report = fixture.launch(&request).unwrap();
        assert_eq!(report.state, LaunchState::TargetResolved);
        assert_eq!(report.outcome.verdict, CompatibilityVerdict::Compatible);
        assert!(fixture.spawner.log.borrow().spawned.is_empty());
    }

    #[test]
    fn test_store_build_uses_fallback_version() {
        let fixture = Fixture::new();
        let name = fixture.config.store_runtime_name.clone();
        let path = fixture.config.runtime_directory.join(&name);
        fs::write(&path, b"not readable as an image").unwrap();
        fixture.write_module("xse64_0_411_140_winstore.dll", RUNTIME);

        let report = fixture.launch(&LaunchRequest::default()).unwrap();
        assert_eq!(report.identity.path, path);
        assert_eq!(report.identity.variant, ExecutableVariant::WinStore);
        assert_eq!(report.identity.version, fixture.config.store_fallback_version);
        assert_eq!(report.outcome.dll_suffix.as_deref(), Some("0_411_140_winstore"));
        assert!(fixture.spawner.log.borrow().spawned[0].1.environment.is_empty());
    }

    #[test]
    fn test_configured_store_marker() {
        let mut fixture = Fixture::new();
        fixture.config.store_runtime_marker = "GamePass".to_string();
        let path = fixture.write_runtime(
            "Runtime-GamePass.exe",
            PeBuilder::new().import("KERNEL32.dll").product_version("0.411.140.2"),
        );

        let orchestrator = Orchestrator::new(
            &fixture.config,
            &fixture.options,
            &fixture.spawner,
            &fixture.injector,
            &UncheckedSigner,
        );
        let identity = orchestrator.identify(&path).unwrap();
        assert_eq!(identity.variant, ExecutableVariant::WinStore);
        assert_eq!(identity.version, VersionTriple::new(0, 411, 140, 2));
    }

    #[test]
    fn test_loader_component_is_rejected() {
        let fixture = Fixture::new();
        let name = fixture.config.default_runtime_name.clone();
        fixture.write_runtime(
            &name,
            PeBuilder::new()
                .product_version("0.411.140.0")
                .version_string("ProductName", "XSE64"),
        );

        let err = fixture.launch(&LaunchRequest::default()).unwrap_err();
        assert!(matches!(err, LoaderError::Identification(_)));
        assert!(fixture.spawner.log.borrow().spawned.is_empty());
    }

    #[test]
    fn test_custom_name_hint() {
        let mut fixture = Fixture::new();
        fixture.options = JsonConfig::parse(r#"{"Loader": {"RuntimeName": "Custom.exe"}}"#).unwrap();
        fixture.write_runtime("Custom.exe", PeBuilder::new().product_version("0.411.141.0"));

        let err = fixture.launch(&LaunchRequest::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("You are using a newer version"));
        assert!(message.contains("removing the RuntimeName setting"));
    }

    #[test]
    fn test_editor_uses_editor_module() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");
        let module = fixture.write_module("xse64_editor.dll", RUNTIME);

        let request = LaunchRequest {
            editor: true,
            ..LaunchRequest::default()
        };
        let report = fixture.launch(&request).unwrap();
        assert_eq!(report.module.map(|m| m.path), Some(module));
    }

    #[test]
    fn test_alternate_module_path() {
        let fixture = Fixture::new();
        fixture.write_steam_runtime("0.411.140.0");
        let module = fixture.write_module("custom_build.dll", RUNTIME);

        let request = LaunchRequest {
            alt_dll: Some(module.clone()),
            ..LaunchRequest::default()
        };
        fixture.launch(&request).unwrap();
        assert_eq!(fixture.injector.calls.borrow()[0].0, module);
    }
}
