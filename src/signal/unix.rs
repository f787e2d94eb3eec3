use super::{SignalError, SignalKind, Signaler};
use crate::process::ProcessHandle;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;

/// SIGINT, SIGTERM and SIGKILL.
pub struct UnixSignaler;

impl UnixSignaler {
    fn send(&self, handle: &ProcessHandle, kind: SignalKind) -> Result<(), SignalError> {
        let signal = match kind {
            SignalKind::Interrupt => Signal::SIGINT,
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        };
        let raw = i32::try_from(handle.pid).map_err(|_| SignalError::Os {
            pid: handle.pid,
            signal: kind,
            source: io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"),
        })?;

        kill(Pid::from_raw(raw), signal).map_err(|errno| match errno {
            Errno::ESRCH => SignalError::Gone { pid: handle.pid },
            Errno::EPERM => SignalError::Denied {
                pid: handle.pid,
                signal: kind,
            },
            other => SignalError::Os {
                pid: handle.pid,
                signal: kind,
                source: io::Error::from(other),
            },
        })
    }
}

impl Signaler for UnixSignaler {
    fn interrupt(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.send(handle, SignalKind::Interrupt)
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.send(handle, SignalKind::Terminate)
    }

    fn kill(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.send(handle, SignalKind::Kill)
    }
}
