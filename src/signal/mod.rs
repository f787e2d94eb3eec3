//! Signal delivery behind one capability, one implementation per platform.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use crate::process::ProcessHandle;
use std::fmt;
use std::io;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Kill,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Interrupt => "interrupt",
            SignalKind::Terminate => "terminate",
            SignalKind::Kill => "kill",
        })
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("process {pid} no longer exists")]
    Gone { pid: u32 },
    #[error("permission denied sending {signal} to process {pid}")]
    Denied { pid: u32, signal: SignalKind },
    #[error("failed to send {signal} to process {pid}: {source}")]
    Os {
        pid: u32,
        signal: SignalKind,
        source: io::Error,
    },
}

impl SignalError {
    pub fn is_gone(&self) -> bool {
        matches!(self, SignalError::Gone { .. })
    }
}

pub trait Signaler: Send + Sync {
    /// The conventional interactive interrupt (Ctrl+C).
    fn interrupt(&self, handle: &ProcessHandle) -> Result<(), SignalError>;

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), SignalError>;

    fn kill(&self, handle: &ProcessHandle) -> Result<(), SignalError>;

    /// True when nothing is actually delivered, so outcomes are hypothetical.
    fn simulated(&self) -> bool {
        false
    }
}

/// The signaler for the platform we were built for.
pub fn platform_signaler() -> Box<dyn Signaler> {
    #[cfg(unix)]
    {
        Box::new(unix::UnixSignaler)
    }
    #[cfg(windows)]
    {
        Box::new(windows::WindowsSignaler)
    }
}

/// Reports what would be sent and delivers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedSignaler;

impl SimulatedSignaler {
    fn report(&self, handle: &ProcessHandle, signal: SignalKind) -> Result<(), SignalError> {
        info!(
            pid = handle.pid,
            name = %handle.name,
            %signal,
            simulated = true,
            "would send signal"
        );
        Ok(())
    }
}

impl Signaler for SimulatedSignaler {
    fn interrupt(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.report(handle, SignalKind::Interrupt)
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.report(handle, SignalKind::Terminate)
    }

    fn kill(&self, handle: &ProcessHandle) -> Result<(), SignalError> {
        self.report(handle, SignalKind::Kill)
    }

    fn simulated(&self) -> bool {
        true
    }
}
