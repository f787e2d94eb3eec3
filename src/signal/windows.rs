use super::{SignalError, SignalKind, Signaler};
use crate::process::ProcessHandle;
use std::io;
use std::process::Command;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER,
};
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_C_EVENT};
use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

/// taskkill exits with 128 when the PID does not exist.
const TASKKILL_NOT_FOUND: i32 = 128;

/// CTRL_C_EVENT for interrupt, a taskkill close request for terminate and
/// TerminateProcess for kill.
pub struct WindowsSignaler;

impl Signaler for WindowsSignaler {
    fn interrupt(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        // Only reaches processes sharing our console; anything else fails
        // and the caller escalates to terminate.
        let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, handle.pid) };
        if ok == 0 {
            return Err(SignalError::Os {
                pid: handle.pid,
                signal: SignalKind::Interrupt,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        let output = Command::new("taskkill")
            .args(["/PID", &handle.pid.to_string()])
            .output()
            .map_err(|source| SignalError::Os {
                pid: handle.pid,
                signal: SignalKind::Terminate,
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        if output.status.code() == Some(TASKKILL_NOT_FOUND) {
            return Err(SignalError::Gone { pid: handle.pid });
        }
        Err(SignalError::Os {
            pid: handle.pid,
            signal: SignalKind::Terminate,
            source: io::Error::other(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        })
    }

    fn kill(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, 0, handle.pid);
            if process.is_null() {
                return Err(last_error(handle.pid, SignalKind::Kill));
            }
            let ok = TerminateProcess(process, 1);
            let result = if ok == 0 {
                Err(last_error(handle.pid, SignalKind::Kill))
            } else {
                Ok(())
            };
            CloseHandle(process);
            result
        }
    }
}

fn last_error(pid: u32, signal: SignalKind) -> SignalError {
    let code = unsafe { GetLastError() };
    match code {
        ERROR_INVALID_PARAMETER => SignalError::Gone { pid },
        ERROR_ACCESS_DENIED => SignalError::Denied { pid, signal },
        _ => SignalError::Os {
            pid,
            signal,
            source: io::Error::from_raw_os_error(code as i32),
        },
    }
}
