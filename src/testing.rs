//! In-memory stand-ins for the OS, shared by the unit tests.

use crate::process::{ProcessDirectory, ProcessHandle};
use crate::sensor::{TemperatureReading, TemperatureSource};
use crate::signal::{SignalError, SignalKind, Signaler};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub struct FakeProcess {
    handle: ProcessHandle,
    running: bool,
    exits_on: Vec<SignalKind>,
    refuses_interrupt: bool,
    refuses_terminate: bool,
    denies_kill: bool,
    exits_at: Option<Instant>,
}

impl FakeProcess {
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            handle: ProcessHandle {
                pid,
                name: name.to_string(),
                command_line: name.to_string(),
                start_time: 1_000,
            },
            running: true,
            exits_on: Vec::new(),
            refuses_interrupt: false,
            refuses_terminate: false,
            denies_kill: false,
            exits_at: None,
        }
    }

    pub fn with_command_line(mut self, command_line: &str) -> Self {
        self.handle.command_line = command_line.to_string();
        self
    }

    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.handle.start_time = start_time;
        self
    }

    /// With a refused signal the process still exits if `exits_on` names it,
    /// like a process dying between two signals.
    pub fn exits_on(mut self, signal: SignalKind) -> Self {
        self.exits_on.push(signal);
        self
    }

    pub fn refuses_interrupt(mut self) -> Self {
        self.refuses_interrupt = true;
        self
    }

    pub fn refuses_terminate(mut self) -> Self {
        self.refuses_terminate = true;
        self
    }

    pub fn denies_kill(mut self) -> Self {
        self.denies_kill = true;
        self
    }

    pub fn exits_after(mut self, delay: Duration) -> Self {
        self.exits_at = Some(Instant::now() + delay);
        self
    }

    fn is_running(&self) -> bool {
        self.running && self.exits_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Default)]
struct HostState {
    processes: Vec<FakeProcess>,
    calls: Vec<(u32, SignalKind)>,
    enumerations: usize,
}

/// A process table plus the directory and signaler views onto it.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn add(&self, process: FakeProcess) -> ProcessHandle {
        let handle = process.handle.clone();
        self.state.lock().unwrap().processes.push(process);
        handle
    }

    pub fn exit(&self, pid: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.processes.iter_mut().find(|p| p.handle.pid == pid) {
            p.running = false;
        }
    }

    pub fn is_running(&self, pid: u32) -> bool {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .any(|p| p.handle.pid == pid && p.is_running())
    }

    fn is_same_running(&self, handle: &ProcessHandle) -> bool {
        let state = self.state.lock().unwrap();
        state.processes.iter().any(|p| {
            p.handle.pid == handle.pid && p.handle.start_time == handle.start_time && p.is_running()
        })
    }

    pub fn calls(&self) -> Vec<(u32, SignalKind)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn enumerations(&self) -> usize {
        self.state.lock().unwrap().enumerations
    }

    pub fn directory(&self) -> FakeDirectory {
        FakeDirectory { host: self.clone() }
    }

    pub fn signaler(&self) -> FakeSignaler {
        FakeSignaler { host: self.clone() }
    }
}

pub struct FakeDirectory {
    host: FakeHost,
}

impl ProcessDirectory for FakeDirectory {
    fn enumerate(&mut self) -> Vec<ProcessHandle> {
        let mut state = self.host.state.lock().unwrap();
        state.enumerations += 1;
        state
            .processes
            .iter()
            .filter(|p| p.is_running())
            .map(|p| p.handle.clone())
            .collect()
    }

    fn is_alive(&mut self, handle: &ProcessHandle) -> bool {
        self.host.is_same_running(handle)
    }
}

/// Records every signal and applies it to the fake process table. Like the
/// OS, it addresses processes by PID alone.
pub struct FakeSignaler {
    host: FakeHost,
}

impl FakeSignaler {
    fn send(&self, handle: &ProcessHandle, signal: SignalKind) -> Result<(), SignalError> {
        let mut state = self.host.state.lock().unwrap();
        state.calls.push((handle.pid, signal));
        let process = state
            .processes
            .iter_mut()
            .find(|p| p.handle.pid == handle.pid && p.is_running())
            .ok_or(SignalError::Gone { pid: handle.pid })?;

        let refused = match signal {
            SignalKind::Interrupt => process.refuses_interrupt,
            SignalKind::Terminate => process.refuses_terminate,
            SignalKind::Kill => process.denies_kill,
        };
        if process.exits_on.contains(&signal) || (signal == SignalKind::Kill && !refused) {
            process.running = false;
        }
        if refused {
            return Err(SignalError::Denied {
                pid: handle.pid,
                signal,
            });
        }
        Ok(())
    }
}

impl Signaler for FakeSignaler {
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

/// Hands out queued readings; repeats the last one when the queue runs dry.
#[derive(Clone)]
pub struct ScriptedSource {
    readings: Arc<Mutex<VecDeque<TemperatureReading>>>,
    samples: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new(readings: Vec<TemperatureReading>) -> Self {
        Self {
            readings: Arc::new(Mutex::new(readings.into())),
            samples: Arc::new(Mutex::new(0)),
        }
    }

    pub fn samples(&self) -> usize {
        *self.samples.lock().unwrap()
    }
}

impl TemperatureSource for ScriptedSource {
    async fn sample(&self) -> TemperatureReading {
        *self.samples.lock().unwrap() += 1;
        let mut readings = self.readings.lock().unwrap();
        if readings.len() > 1 {
            readings.pop_front().unwrap()
        } else {
            readings
                .front()
                .cloned()
                .unwrap_or_else(|| TemperatureReading::Unavailable("no readings".to_string()))
        }
    }
}
