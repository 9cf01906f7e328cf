//! Hosting-mode detection.

use std::io;

use thiserror::Error;

/// Errors surfaced while detecting the hosting mode.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Querying the process tree failed.
    #[error("failed to query the hosting process: {source}")]
    Query {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Reports whether the process runs under the host service manager.
pub trait HostProbe {
    /// `true` when managed, `false` when launched interactively.
    fn is_managed(&self) -> Result<bool, ProbeError>;
}

/// Probe backed by the operating system.
///
/// On Windows a process is managed when its parent is the Service Control
/// Manager (`services.exe`). Elsewhere there is no manager to detect.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    /// Builds the system probe.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(windows))]
impl HostProbe for SystemProbe {
    fn is_managed(&self) -> Result<bool, ProbeError> {
        Ok(false)
    }
}

#[cfg(windows)]
impl HostProbe for SystemProbe {
    fn is_managed(&self) -> Result<bool, ProbeError> {
        let processes = snapshot::processes().map_err(|source| ProbeError::Query { source })?;
        let current = std::process::id();
        let Some(parent) = processes
            .iter()
            .find(|entry| entry.pid == current)
            .map(|entry| entry.parent_pid)
        else {
            return Err(ProbeError::Query {
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    "current process missing from snapshot",
                ),
            });
        };
        Ok(processes
            .iter()
            .find(|entry| entry.pid == parent)
            .is_some_and(|entry| entry.exe.eq_ignore_ascii_case("services.exe")))
    }
}

#[cfg(windows)]
mod snapshot {
    use std::io;
    use std::mem;

    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    pub(super) struct ProcessEntry {
        pub(super) pid: u32,
        pub(super) parent_pid: u32,
        pub(super) exe: String,
    }

    struct Snapshot(HANDLE);

    impl Drop for Snapshot {
        fn drop(&mut self) {
            // SAFETY: the handle came from a successful CreateToolhelp32Snapshot.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    pub(super) fn processes() -> io::Result<Vec<ProcessEntry>> {
        // SAFETY: plain FFI call; the result is checked below.
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        let snapshot = Snapshot(handle);

        // SAFETY: PROCESSENTRY32W is plain data; zeroed is a valid bit pattern.
        let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut entries = Vec::new();
        // SAFETY: `entry` is initialised with its size as the API requires.
        let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) } != 0;
        while more {
            let len = entry
                .szExeFile
                .iter()
                .position(|c| *c == 0)
                .unwrap_or(entry.szExeFile.len());
            entries.push(ProcessEntry {
                pid: entry.th32ProcessID,
                parent_pid: entry.th32ParentProcessID,
                exe: String::from_utf16_lossy(&entry.szExeFile[..len]),
            });
            // SAFETY: as above.
            more = unsafe { Process32NextW(snapshot.0, &mut entry) } != 0;
        }
        Ok(entries)
    }
}
