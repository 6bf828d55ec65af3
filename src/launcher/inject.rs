//! Companion module injection
//!
//! The Windows injector writes the module path into the suspended process
//! and runs `LoadLibraryW` on a remote thread. It never resumes the primary
//! thread.

use log::error;
use std::fmt;
use std::path::Path;

use crate::launcher::process::SuspendedProcess;

pub trait Injector: fmt::Debug {
    /// Load `module` into `process`. With `use_timeout`, give up if the
    /// remote load has not finished within the injector's timeout.
    fn inject(&self, process: &dyn SuspendedProcess, module: &Path, use_timeout: bool) -> bool;
}

/// Injector for platforms without remote thread support
#[derive(Debug, Default)]
pub struct UnsupportedInjector;

impl Injector for UnsupportedInjector {
    fn inject(&self, process: &dyn SuspendedProcess, module: &Path, _use_timeout: bool) -> bool {
        error!(
            "Cannot inject {} into process {} on this platform",
            module.display(),
            process.id()
        );
        false
    }
}

/// Injector for the host platform
pub fn default_injector(timeout_ms: u32) -> Box<dyn Injector> {
    #[cfg(target_os = "windows")]
    {
        Box::new(win32::RemoteThreadInjector::new(timeout_ms))
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = timeout_ms;
        Box::new(UnsupportedInjector)
    }
}

#[cfg(target_os = "windows")]
pub use win32::RemoteThreadInjector;

#[cfg(target_os = "windows")]
mod win32 {
    use super::Injector;
    use crate::launcher::process::SuspendedProcess;
    use log::{debug, error, info};
    use std::ffi::c_void;
    use std::path::Path;

    use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
    };
    use windows::Win32::System::Threading::{
        CreateRemoteThread, GetExitCodeThread, INFINITE, WaitForSingleObject,
    };
    use windows::core::{s, w};

    type ThreadStart = unsafe extern "system" fn(*mut c_void) -> u32;

    /// `LoadLibraryW` on a remote thread
    #[derive(Debug, Clone)]
    pub struct RemoteThreadInjector {
        timeout_ms: u32,
    }

    impl RemoteThreadInjector {
        pub fn new(timeout_ms: u32) -> Self {
            Self { timeout_ms }
        }
    }

    impl Injector for RemoteThreadInjector {
        #[allow(unsafe_code)] // Required for Windows API FFI calls
        fn inject(&self, process: &dyn SuspendedProcess, module: &Path, use_timeout: bool) -> bool {
            let Some(handles) = process.native_handles() else {
                error!("Process {} exposes no native handle", process.id());
                return false;
            };
            let target = HANDLE(handles.process as *mut c_void);

            let path_w: Vec<u16> = module
                .to_string_lossy()
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect();
            let size = path_w.len() * std::mem::size_of::<u16>();

            // SAFETY: `target` is a live process handle owned by the caller;
            // every local buffer outlives the calls that read it.
            unsafe {
                let remote = VirtualAllocEx(target, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
                if remote.is_null() {
                    error!("VirtualAllocEx failed in process {}", process.id());
                    return false;
                }

                if let Err(e) = WriteProcessMemory(target, remote, path_w.as_ptr() as *const c_void, size, None) {
                    error!("WriteProcessMemory failed: {}", e);
                    let _ = VirtualFreeEx(target, remote, 0, MEM_RELEASE);
                    return false;
                }

                let load_library = match GetModuleHandleW(w!("kernel32.dll")) {
                    Ok(kernel32) => GetProcAddress(kernel32, s!("LoadLibraryW")),
                    Err(e) => {
                        error!("GetModuleHandleW(kernel32) failed: {}", e);
                        None
                    }
                };
                let Some(load_library) = load_library else {
                    error!("Couldn't resolve LoadLibraryW");
                    let _ = VirtualFreeEx(target, remote, 0, MEM_RELEASE);
                    return false;
                };
                let start: ThreadStart = std::mem::transmute(load_library);

                let thread = match CreateRemoteThread(target, None, 0, Some(start), Some(remote as *const c_void), 0, None) {
                    Ok(thread) => thread,
                    Err(e) => {
                        error!("CreateRemoteThread failed: {}", e);
                        let _ = VirtualFreeEx(target, remote, 0, MEM_RELEASE);
                        return false;
                    }
                };

                let timeout = if use_timeout { self.timeout_ms } else { INFINITE };
                debug!("Waiting for remote load (timeout {} ms)", timeout);
                let finished = WaitForSingleObject(thread, timeout) == WAIT_OBJECT_0;

                let mut loaded = false;
                if finished {
                    let mut exit_code = 0u32;
                    loaded = GetExitCodeThread(thread, &mut exit_code).is_ok() && exit_code != 0;
                    if !loaded {
                        error!("LoadLibraryW returned NULL for {}", module.display());
                    }
                    let _ = VirtualFreeEx(target, remote, 0, MEM_RELEASE);
                } else {
                    // The remote thread may still read the path buffer
                    error!("Timed out waiting for {} to load", module.display());
                }
                let _ = CloseHandle(thread);

                if loaded {
                    info!("Injected {} into process {}", module.display(), process.id());
                }
                loaded
            }
        }
    }
}
