//! The polling loop: sample, compare, and respond.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::process::matcher::select_targets;
use crate::process::{ProcessDirectory, ProcessHandle};
use crate::sensor::{TemperatureReading, TemperatureSource};
use crate::shutdown::{ShutdownOrchestrator, ShutdownOutcome};
use crate::state::{now_unix, Status, WatchdogState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time;
use tracing::{debug, error, info, warn};

/// Pause after a completed shutdown so a still-cooling GPU does not
/// immediately re-trigger.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    SensorUnavailable(String),
    Nominal(f64),
    NoTargets(f64),
    Responded(Vec<ShutdownOutcome>),
}

/// Result of a one-shot check that never signals anything.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub reading: TemperatureReading,
    pub threshold_celsius: f64,
    /// Only populated when the reading is at or above the threshold.
    pub targets: Option<Vec<ProcessHandle>>,
}

impl Inspection {
    pub fn exceeds_threshold(&self) -> bool {
        self.reading
            .celsius()
            .is_some_and(|c| c >= self.threshold_celsius)
    }
}

pub struct Watchdog<S, D> {
    config: Config,
    source: S,
    directory: D,
    orchestrator: ShutdownOrchestrator,
    cooldown: Duration,
    status: Arc<RwLock<Status>>,
    metrics: Option<Arc<Metrics>>,
}

impl<S, D> Watchdog<S, D>
where
    S: TemperatureSource,
    D: ProcessDirectory,
{
    pub fn new(config: Config, source: S, directory: D, orchestrator: ShutdownOrchestrator) -> Self {
        let mut status = Status::new(now_unix(), config.threshold_celsius);
        status.simulated = orchestrator.simulated();
        Self {
            config,
            source,
            directory,
            orchestrator,
            cooldown: DEFAULT_COOLDOWN,
            status: Arc::new(RwLock::new(status)),
            metrics: None,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.set_threshold(self.config.threshold_celsius);
        self.metrics = Some(metrics);
        self
    }

    pub fn status(&self) -> Arc<RwLock<Status>> {
        self.status.clone()
    }

    /// Runs ticks until `stop` flips to true. A stop request interrupts the
    /// sleeps between ticks but never a shutdown already in progress.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!(
            threshold_celsius = self.config.threshold_celsius,
            poll_interval_secs = self.config.poll_interval_secs,
            grace_period_secs = self.config.grace_period_secs,
            "GPU watchdog started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            if *stop.borrow() {
                break;
            }

            let outcome = self.tick().await;
            let responded = matches!(outcome, TickOutcome::Responded(_));
            let delay = if responded {
                info!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "waiting after shutdown before next check"
                );
                self.cooldown
            } else {
                poll_interval
            };

            let stopped = sleep_or_stop(delay, &mut stop).await;
            if responded {
                self.set_state(WatchdogState::Idle).await;
            }
            if stopped {
                info!("stop requested");
                break;
            }
        }

        info!("GPU watchdog stopped");
    }

    /// One sample-decide-respond cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let reading = self.sample().await;
        let celsius = match reading {
            TemperatureReading::Celsius(v) => v,
            TemperatureReading::Unavailable(reason) => {
                warn!(reason = %reason, "could not read GPU temperature, skipping check");
                return TickOutcome::SensorUnavailable(reason);
            }
        };

        let threshold = self.config.threshold_celsius;
        if celsius < threshold {
            debug!(celsius, threshold, "GPU temperature within safe range");
            return TickOutcome::Nominal(celsius);
        }

        error!(celsius, threshold, "GPU temperature exceeds threshold");
        let targets = self.find_targets();
        if targets.is_empty() {
            warn!("no target processes found to shut down");
            return TickOutcome::NoTargets(celsius);
        }

        self.set_state(WatchdogState::Responding).await;
        let grace_period = Duration::from_secs(self.config.grace_period_secs);
        let outcomes = self
            .orchestrator
            .shutdown(&mut self.directory, targets, grace_period)
            .await;

        // Simulated kills never happened; keep them out of the counters.
        if let Some(metrics) = self.metrics.as_ref().filter(|_| !self.orchestrator.simulated()) {
            metrics.observe_outcomes(&outcomes);
        }
        self.status
            .write()
            .await
            .finish_response(now_unix(), outcomes.clone());
        TickOutcome::Responded(outcomes)
    }

    /// Samples once and, when hot, lists what would be shut down.
    pub async fn inspect(&mut self) -> Inspection {
        let reading = self.sample().await;
        let threshold_celsius = self.config.threshold_celsius;
        let targets = match reading.celsius() {
            Some(c) if c >= threshold_celsius => Some(self.find_targets()),
            _ => None,
        };
        Inspection {
            reading,
            threshold_celsius,
            targets,
        }
    }

    async fn sample(&mut self) -> TemperatureReading {
        let reading = self.source.sample().await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_reading(&reading, self.config.threshold_celsius);
        }
        self.status
            .write()
            .await
            .record_reading(now_unix(), &reading);
        if let Some(celsius) = reading.celsius() {
            debug!(celsius, "current GPU temperature");
        }
        reading
    }

    fn find_targets(&mut self) -> Vec<ProcessHandle> {
        let snapshot = self.directory.enumerate();
        let targets = select_targets(snapshot, &self.config.target_process_names);
        for target in &targets {
            info!(pid = target.pid, name = %target.name, "found target process");
        }
        targets
    }

    async fn set_state(&self, next: WatchdogState) {
        let mut status = self.status.write().await;
        if status.state == next {
            return;
        }
        info!(from = ?status.state, to = ?next, "watchdog state changed");
        match next {
            WatchdogState::Responding => status.begin_response(),
            WatchdogState::Idle => status.back_to_idle(),
        }
    }
}

/// Sleeps for `delay`; returns true early if a stop is requested.
/// `time::sleep` clamps delays past the end of the clock instead of
/// overflowing.
async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = stop.changed() => match changed {
                Ok(()) if *stop.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    // Nobody can ask us to stop any more.
                    sleep.await;
                    return false;
                }
            }
        }
    }
}
