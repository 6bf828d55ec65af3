//! Suspended process creation and ownership
//!
//! `ProcessSpawner` creates the runtime with its primary thread suspended.
//! The resulting `SuspendedProcess` is wrapped in a `ProcessHandle`, which
//! terminates the process if it is dropped before being resumed.

use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Windows ERROR_ACCESS_DENIED
pub const ERROR_ACCESS_DENIED: u32 = 5;
/// Windows ERROR_ELEVATION_REQUIRED
pub const ERROR_ELEVATION_REQUIRED: u32 = 740;

/// Exit code used when the loader kills a process it created
pub const TERMINATED_EXIT_CODE: u32 = 0;

#[derive(Debug)]
pub enum SpawnError {
    AccessDenied { path: PathBuf },
    ElevationRequired { path: PathBuf },
    Os { path: PathBuf, code: u32 },
    /// The host platform cannot create suspended processes
    Unsupported,
}

impl SpawnError {
    /// Classify an OS error code from process creation
    pub fn from_os_code(path: &Path, code: u32) -> Self {
        let path = path.to_path_buf();
        match code {
            ERROR_ACCESS_DENIED => SpawnError::AccessDenied { path },
            ERROR_ELEVATION_REQUIRED => SpawnError::ElevationRequired { path },
            code => SpawnError::Os { path, code },
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::AccessDenied { path } => write!(
                f,
                "Access denied when trying to launch {}. This is common with Microsoft Store games. \
                 Please try running the loader as an administrator.",
                path.display()
            ),
            SpawnError::ElevationRequired { path } => write!(
                f,
                "Launching {} failed ({ERROR_ELEVATION_REQUIRED}). Please try running the loader as an administrator.",
                path.display()
            ),
            SpawnError::Os { path, code } => write!(
                f,
                "Launching {} failed. Error code: {code} (0x{code:08X}).",
                path.display()
            ),
            SpawnError::Unsupported => {
                write!(f, "Launching suspended processes is only supported on Windows.")
            }
        }
    }
}

impl std::error::Error for SpawnError {}

/// Scheduling priority class for the new process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Realtime,
    High,
    AboveNormal,
    Normal,
    BelowNormal,
    Idle,
}

impl PriorityClass {
    /// Process creation flag for this class
    pub const fn creation_flag(self) -> u32 {
        match self {
            PriorityClass::Realtime => 0x0000_0100,
            PriorityClass::High => 0x0000_0080,
            PriorityClass::AboveNormal => 0x0000_8000,
            PriorityClass::Normal => 0x0000_0020,
            PriorityClass::BelowNormal => 0x0000_4000,
            PriorityClass::Idle => 0x0000_0040,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    pub priority: Option<PriorityClass>,
    /// CPU affinity mask; failure to apply it is only a warning
    pub affinity: Option<u64>,
    /// Set on the loader process before creation so the child inherits them
    pub environment: Vec<(String, String)>,
}

/// Raw OS handles, for collaborators that need to act on the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandles {
    pub process: usize,
    pub thread: usize,
}

/// A process whose primary thread has not been scheduled yet
pub trait SuspendedProcess: fmt::Debug {
    fn id(&self) -> u32;

    fn thread_id(&self) -> u32;

    fn native_handles(&self) -> Option<NativeHandles>;

    /// Resume the primary thread, returning the previous suspend count
    fn resume(&mut self) -> io::Result<u32>;

    fn terminate(&mut self, exit_code: u32) -> io::Result<()>;

    /// Block until the process exits
    fn wait(&mut self) -> io::Result<u32>;
}

pub trait ProcessSpawner: fmt::Debug {
    fn spawn_suspended(
        &self,
        path: &Path,
        options: &SpawnOptions,
    ) -> Result<Box<dyn SuspendedProcess>, SpawnError>;
}

/// Exclusive owner of a spawned process.
///
/// OS handles are released when the handle is dropped; a process that is
/// still suspended at that point is terminated first.
#[derive(Debug)]
pub struct ProcessHandle {
    process: Box<dyn SuspendedProcess>,
    suspended: bool,
}

impl ProcessHandle {
    pub fn new(process: Box<dyn SuspendedProcess>) -> Self {
        Self {
            process,
            suspended: true,
        }
    }

    pub fn id(&self) -> u32 {
        self.process.id()
    }

    pub fn thread_id(&self) -> u32 {
        self.process.thread_id()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn process(&self) -> &dyn SuspendedProcess {
        self.process.as_ref()
    }

    /// Resume the primary thread. Ownership of the running process passes to
    /// the OS even if the call fails.
    pub fn resume(&mut self) -> io::Result<u32> {
        self.suspended = false;
        self.process.resume()
    }

    pub fn terminate(&mut self) -> io::Result<()> {
        self.process.terminate(TERMINATED_EXIT_CODE)?;
        self.suspended = false;
        Ok(())
    }

    pub fn wait(&mut self) -> io::Result<u32> {
        self.process.wait()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.suspended {
            warn!("Terminating suspended process {}", self.process.id());
            if let Err(e) = self.process.terminate(TERMINATED_EXIT_CODE) {
                warn!("Couldn't terminate process {}: {}", self.process.id(), e);
            }
        }
        debug!("Releasing process {}", self.process.id());
    }
}

/// Spawner for platforms without suspended process creation
#[derive(Debug, Default)]
pub struct UnsupportedSpawner;

impl ProcessSpawner for UnsupportedSpawner {
    fn spawn_suspended(
        &self,
        path: &Path,
        _options: &SpawnOptions,
    ) -> Result<Box<dyn SuspendedProcess>, SpawnError> {
        debug!("Refusing to spawn {} on this platform", path.display());
        Err(SpawnError::Unsupported)
    }
}

/// Spawner for the host platform
pub fn default_spawner() -> Box<dyn ProcessSpawner> {
    #[cfg(target_os = "windows")]
    {
        Box::new(win32::Win32Spawner)
    }
    #[cfg(not(target_os = "windows"))]
    {
        Box::new(UnsupportedSpawner)
    }
}

#[cfg(target_os = "windows")]
pub use win32::Win32Spawner;

#[cfg(target_os = "windows")]
mod win32 {
    use super::{NativeHandles, ProcessSpawner, SpawnError, SpawnOptions, SuspendedProcess};
    use log::{debug, info, warn};
    use std::io;
    use std::path::Path;

    use windows::Win32::Foundation::{BOOL, CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::System::Environment::SetEnvironmentVariableW;
    use windows::Win32::System::Threading::{
        CREATE_SUSPENDED, CreateProcessW, GetExitCodeProcess, INFINITE, PROCESS_CREATION_FLAGS,
        PROCESS_INFORMATION, ResumeThread, STARTUPINFOW, SetProcessAffinityMask, TerminateProcess,
        WaitForSingleObject,
    };
    use windows::core::{PCWSTR, PWSTR};

    fn wide(text: &str) -> Vec<u16> {
        text.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Win32 error code carried by a `windows::core::Error`
    pub(super) fn win32_code(err: &windows::core::Error) -> u32 {
        (err.code().0 as u32) & 0xFFFF
    }

    #[derive(Debug, Default)]
    pub struct Win32Spawner;

    impl ProcessSpawner for Win32Spawner {
        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn spawn_suspended(
            &self,
            path: &Path,
            options: &SpawnOptions,
        ) -> Result<Box<dyn SuspendedProcess>, SpawnError> {
            for (key, value) in &options.environment {
                debug!("Setting {}={}", key, value);
                let (key_w, value_w) = (wide(key), wide(value));
                // SAFETY: both buffers are NUL-terminated and outlive the call
                if let Err(e) = unsafe {
                    SetEnvironmentVariableW(PCWSTR(key_w.as_ptr()), PCWSTR(value_w.as_ptr()))
                } {
                    warn!("Couldn't set {}: {}", key, e);
                }
            }

            let path_w = wide(&path.to_string_lossy());
            let mut flags = CREATE_SUSPENDED;
            if let Some(priority) = options.priority {
                flags = flags | PROCESS_CREATION_FLAGS(priority.creation_flag());
            }

            let startup = STARTUPINFOW {
                cb: std::mem::size_of::<STARTUPINFOW>() as u32,
                ..Default::default()
            };
            let mut info = PROCESS_INFORMATION::default();

            // SAFETY: all pointers reference live locals for the duration of the call
            let created = unsafe {
                CreateProcessW(
                    PCWSTR(path_w.as_ptr()),
                    PWSTR::null(),
                    None,
                    None,
                    BOOL::from(false),
                    flags,
                    None,
                    PCWSTR::null(),
                    &startup,
                    &mut info,
                )
            };
            if let Err(e) = created {
                return Err(SpawnError::from_os_code(path, win32_code(&e)));
            }

            info!(
                "Created {} suspended (pid {}, main thread id {})",
                path.display(),
                info.dwProcessId,
                info.dwThreadId
            );

            let process = Win32Process {
                process: info.hProcess,
                thread: info.hThread,
                id: info.dwProcessId,
                thread_id: info.dwThreadId,
            };

            if let Some(mask) = options.affinity {
                debug!("Setting affinity mask to {:016X}", mask);
                // SAFETY: the process handle is owned by `process` and still open
                if let Err(e) = unsafe { SetProcessAffinityMask(process.process, mask as usize) } {
                    warn!("Couldn't set affinity mask ({:08X})", win32_code(&e));
                }
            }

            Ok(Box::new(process))
        }
    }

    #[derive(Debug)]
    struct Win32Process {
        process: HANDLE,
        thread: HANDLE,
        id: u32,
        thread_id: u32,
    }

    impl SuspendedProcess for Win32Process {
        fn id(&self) -> u32 {
            self.id
        }

        fn thread_id(&self) -> u32 {
            self.thread_id
        }

        fn native_handles(&self) -> Option<NativeHandles> {
            Some(NativeHandles {
                process: self.process.0 as usize,
                thread: self.thread.0 as usize,
            })
        }

        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn resume(&mut self) -> io::Result<u32> {
            // SAFETY: the thread handle is owned by this value and still open
            let previous = unsafe { ResumeThread(self.thread) };
            if previous == u32::MAX {
                return Err(io::Error::last_os_error());
            }
            Ok(previous)
        }

        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn terminate(&mut self, exit_code: u32) -> io::Result<()> {
            // SAFETY: the process handle is owned by this value and still open
            unsafe { TerminateProcess(self.process, exit_code) }
                .map_err(|e| io::Error::from_raw_os_error(win32_code(&e) as i32))
        }

        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn wait(&mut self) -> io::Result<u32> {
            // SAFETY: the process handle is owned by this value and still open
            let event = unsafe { WaitForSingleObject(self.process, INFINITE) };
            if event != WAIT_OBJECT_0 {
                return Err(io::Error::last_os_error());
            }
            let mut code = 0u32;
            // SAFETY: `code` is a live local
            unsafe { GetExitCodeProcess(self.process, &mut code) }
                .map_err(|e| io::Error::from_raw_os_error(win32_code(&e) as i32))?;
            Ok(code)
        }
    }

    impl Drop for Win32Process {
        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn drop(&mut self) {
            for handle in [self.thread, self.process] {
                if !handle.is_invalid() {
                    // SAFETY: each handle came from CreateProcessW and is closed once here
                    let _ = unsafe { CloseHandle(handle) };
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeSpawner;
    use super::*;

    #[test]
    fn test_spawn_error_classification() {
        let path = Path::new("Runtime.exe");
        assert!(matches!(
            SpawnError::from_os_code(path, 5),
            SpawnError::AccessDenied { .. }
        ));
        assert!(matches!(
            SpawnError::from_os_code(path, 740),
            SpawnError::ElevationRequired { .. }
        ));
        let other = SpawnError::from_os_code(path, 2);
        assert_eq!(
            other.to_string(),
            "Launching Runtime.exe failed. Error code: 2 (0x00000002)."
        );
    }

    #[test]
    fn test_dropping_suspended_handle_terminates() {
        let spawner = FakeSpawner::default();
        let process = spawner
            .spawn_suspended(Path::new("Runtime.exe"), &SpawnOptions::default())
            .unwrap();
        drop(ProcessHandle::new(process));

        let log = spawner.log.borrow();
        assert_eq!(log.terminated, 1);
        assert_eq!(log.released, 1);
        assert!(!log.running);
    }

    #[test]
    fn test_resumed_handle_is_left_running() {
        let spawner = FakeSpawner::default();
        let process = spawner
            .spawn_suspended(Path::new("Runtime.exe"), &SpawnOptions::default())
            .unwrap();
        let mut handle = ProcessHandle::new(process);
        assert_eq!(handle.resume().unwrap(), 1);
        assert!(!handle.is_suspended());
        drop(handle);

        let log = spawner.log.borrow();
        assert_eq!(log.terminated, 0);
        assert_eq!(log.released, 1);
        assert!(log.running);
    }

    #[test]
    fn test_explicit_terminate_is_not_repeated_on_drop() {
        let spawner = FakeSpawner::default();
        let process = spawner
            .spawn_suspended(Path::new("Runtime.exe"), &SpawnOptions::default())
            .unwrap();
        let mut handle = ProcessHandle::new(process);
        handle.terminate().unwrap();
        drop(handle);

        assert_eq!(spawner.log.borrow().terminated, 1);
        assert_eq!(spawner.log.borrow().released, 1);
    }

    #[test]
    fn test_priority_flags() {
        assert_eq!(PriorityClass::High.creation_flag(), 0x80);
        assert_eq!(PriorityClass::Idle.creation_flag(), 0x40);
    }

    #[test]
    fn test_unsupported_spawner() {
        let err = UnsupportedSpawner
            .spawn_suspended(Path::new("Runtime.exe"), &SpawnOptions::default())
            .unwrap_err();
        assert!(matches!(err, SpawnError::Unsupported));
    }
}
