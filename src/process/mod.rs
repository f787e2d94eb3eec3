//! Process enumeration and liveness probing.

pub mod matcher;

use std::fmt;
use sysinfo::{Pid, PidExt, ProcessExt, ProcessStatus, System, SystemExt};
use tracing::debug;

/// One process as seen by a single enumeration snapshot.
///
/// `start_time` pins the handle to the process it was taken from, so a PID
/// recycled by the OS after the original exited never reads as alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub start_time: u64,
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID {}: {}", self.pid, self.name)
    }
}

pub trait ProcessDirectory: Send {
    /// Full snapshot ordered by PID. Processes that vanish or deny access
    /// while being inspected are left out.
    fn enumerate(&mut self) -> Vec<ProcessHandle>;

    fn is_alive(&mut self, handle: &ProcessHandle) -> bool;
}

pub struct SysinfoDirectory {
    system: System,
    own_pid: u32,
}

impl SysinfoDirectory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SysinfoDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDirectory for SysinfoDirectory {
    fn enumerate(&mut self) -> Vec<ProcessHandle> {
        self.system.refresh_processes();

        let mut handles: Vec<ProcessHandle> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let pid = pid.as_u32();
                if pid == self.own_pid {
                    return None;
                }
                if process.status() == ProcessStatus::Zombie {
                    debug!(pid, "skipping zombie process");
                    return None;
                }
                let name = process.name();
                if name.is_empty() {
                    debug!(pid, "skipping process without readable name");
                    return None;
                }
                Some(ProcessHandle {
                    pid,
                    name: name.to_string(),
                    command_line: process.cmd().join(" "),
                    start_time: process.start_time(),
                })
            })
            .collect();

        handles.sort_by_key(|h| h.pid);
        debug!(count = handles.len(), "process snapshot taken");
        handles
    }

    fn is_alive(&mut self, handle: &ProcessHandle) -> bool {
        let pid = Pid::from_u32(handle.pid);
        if !self.system.refresh_process(pid) {
            return false;
        }
        match self.system.process(pid) {
            Some(process) => {
                process.status() != ProcessStatus::Zombie
                    && process.start_time() == handle.start_time
            }
            None => false,
        }
    }
}
