//! Graceful-then-forced shutdown of the target workload.
//!
//! Every target gets an interrupt (terminate if the interrupt cannot be
//! delivered), then one settle delay, then liveness polling against a single
//! grace deadline. Whatever is still running at the deadline is killed.

use crate::process::{ProcessDirectory, ProcessHandle};
use crate::signal::{SignalKind, Signaler};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

/// Pause after the interrupt phase before the first liveness check.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Liveness polling step inside the grace period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    GracefullyExited,
    ForceKilled,
    KillFailed,
    AlreadyGone,
}

impl FinalState {
    pub const ALL: [FinalState; 4] = [
        FinalState::GracefullyExited,
        FinalState::ForceKilled,
        FinalState::KillFailed,
        FinalState::AlreadyGone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FinalState::GracefullyExited => "gracefully_exited",
            FinalState::ForceKilled => "force_killed",
            FinalState::KillFailed => "kill_failed",
            FinalState::AlreadyGone => "already_gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownOutcome {
    pub pid: u32,
    pub name: String,
    pub state: FinalState,
}

impl ShutdownOutcome {
    fn new(handle: &ProcessHandle, state: FinalState) -> Self {
        Self {
            pid: handle.pid,
            name: handle.name.clone(),
            state,
        }
    }
}

enum Delivery {
    Sent,
    Gone,
}

pub struct ShutdownOrchestrator {
    signaler: Box<dyn Signaler>,
    settle_delay: Duration,
    poll_interval: Duration,
}

impl ShutdownOrchestrator {
    pub fn new(signaler: Box<dyn Signaler>) -> Self {
        Self {
            signaler,
            settle_delay: DEFAULT_SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn simulated(&self) -> bool {
        self.signaler.simulated()
    }

    /// Drives `targets` to termination. Returns one outcome per target, in
    /// target order. Never waits longer than the settle delay plus
    /// `grace_period`.
    pub async fn shutdown(
        &self,
        directory: &mut dyn ProcessDirectory,
        targets: Vec<ProcessHandle>,
        grace_period: Duration,
    ) -> Vec<ShutdownOutcome> {
        if targets.is_empty() {
            info!("no target processes to shut down");
            return Vec::new();
        }

        let started = Instant::now();
        warn!(count = targets.len(), "initiating graceful shutdown");

        let mut finished: Vec<(usize, ShutdownOutcome)> = Vec::with_capacity(targets.len());
        let mut pending = Vec::with_capacity(targets.len());
        for (idx, target) in targets.iter().enumerate() {
            match self.deliver_interrupt(directory, target) {
                Delivery::Sent => pending.push(idx),
                Delivery::Gone => {
                    finished.push((idx, ShutdownOutcome::new(target, FinalState::AlreadyGone)))
                }
            }
        }

        if !pending.is_empty() {
            time::sleep(self.settle_delay).await;
            pending = reap(directory, &targets, pending, &mut finished);
        }

        if !pending.is_empty() {
            pending = self
                .wait_for_exit(directory, &targets, pending, &mut finished, grace_period)
                .await;
        }

        if !pending.is_empty() {
            warn!(count = pending.len(), "force killing remaining processes");
            for idx in pending {
                let target = &targets[idx];
                let state = self.force_kill(directory, target);
                finished.push((idx, ShutdownOutcome::new(target, state)));
            }
        }

        finished.sort_by_key(|(idx, _)| *idx);
        let outcomes: Vec<ShutdownOutcome> =
            finished.into_iter().map(|(_, outcome)| outcome).collect();

        let count = |state: FinalState| outcomes.iter().filter(|o| o.state == state).count();
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            gracefully_exited = count(FinalState::GracefullyExited),
            force_killed = count(FinalState::ForceKilled),
            kill_failed = count(FinalState::KillFailed),
            already_gone = count(FinalState::AlreadyGone),
            "shutdown procedure completed"
        );
        outcomes
    }

    /// A failed interrupt escalates to terminate right away instead of
    /// waiting for the settle delay.
    fn deliver_interrupt(
        &self,
        directory: &mut dyn ProcessDirectory,
        target: &ProcessHandle,
    ) -> Delivery {
        // The PID may belong to someone else by now; signals only carry the PID.
        if !directory.is_alive(target) {
            info!(pid = target.pid, name = %target.name, "process already exited");
            return Delivery::Gone;
        }

        let err = match self.signaler.interrupt(target) {
            Ok(()) => {
                info!(pid = target.pid, name = %target.name, signal = %SignalKind::Interrupt, "signal sent");
                return Delivery::Sent;
            }
            Err(err) if err.is_gone() => {
                info!(pid = target.pid, name = %target.name, "process already exited");
                return Delivery::Gone;
            }
            Err(err) => err,
        };

        warn!(
            pid = target.pid,
            signal = %SignalKind::Interrupt,
            error = %err,
            "interrupt failed, falling back to terminate"
        );
        match self.signaler.terminate(target) {
            Ok(()) => {
                info!(pid = target.pid, name = %target.name, signal = %SignalKind::Terminate, "signal sent");
                Delivery::Sent
            }
            Err(err) if err.is_gone() => {
                info!(pid = target.pid, name = %target.name, "process already exited");
                Delivery::Gone
            }
            Err(err) => {
                error!(
                    pid = target.pid,
                    signal = %SignalKind::Terminate,
                    error = %err,
                    "terminate failed, leaving process for force kill"
                );
                Delivery::Sent
            }
        }
    }

    async fn wait_for_exit(
        &self,
        directory: &mut dyn ProcessDirectory,
        targets: &[ProcessHandle],
        mut pending: Vec<usize>,
        finished: &mut Vec<(usize, ShutdownOutcome)>,
        grace_period: Duration,
    ) -> Vec<usize> {
        // A grace period past the end of the clock just means no deadline.
        let deadline = Instant::now().checked_add(grace_period);
        info!(
            count = pending.len(),
            grace_secs = grace_period.as_secs(),
            "waiting for processes to shut down gracefully"
        );

        loop {
            pending = reap(directory, targets, pending, finished);
            if pending.is_empty() {
                info!("all target processes have shut down gracefully");
                break;
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                break;
            }
            info!(
                alive = pending.len(),
                remaining_secs = remaining.as_secs(),
                "still waiting"
            );
            time::sleep(self.poll_interval.min(remaining)).await;
        }
        pending
    }

    fn force_kill(&self, directory: &mut dyn ProcessDirectory, target: &ProcessHandle) -> FinalState {
        if !directory.is_alive(target) {
            info!(pid = target.pid, name = %target.name, "process exited before force kill");
            return FinalState::AlreadyGone;
        }

        match self.signaler.kill(target) {
            Ok(()) => {
                warn!(pid = target.pid, name = %target.name, signal = %SignalKind::Kill, "process force killed");
                FinalState::ForceKilled
            }
            Err(err) if err.is_gone() => {
                info!(pid = target.pid, name = %target.name, "process exited before force kill");
                FinalState::AlreadyGone
            }
            Err(err) => {
                error!(
                    pid = target.pid,
                    signal = %SignalKind::Kill,
                    error = %err,
                    "force kill failed"
                );
                FinalState::KillFailed
            }
        }
    }
}

/// Drops exited processes from `pending`, recording them as graceful exits.
fn reap(
    directory: &mut dyn ProcessDirectory,
    targets: &[ProcessHandle],
    pending: Vec<usize>,
    finished: &mut Vec<(usize, ShutdownOutcome)>,
) -> Vec<usize> {
    pending
        .into_iter()
        .filter(|&idx| {
            let target = &targets[idx];
            if directory.is_alive(target) {
                return true;
            }
            info!(pid = target.pid, name = %target.name, "process shut down gracefully");
            finished.push((idx, ShutdownOutcome::new(target, FinalState::GracefullyExited)));
            false
        })
        .collect()
}
