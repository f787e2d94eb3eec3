use crate::sensor::TemperatureReading;
use crate::shutdown::ShutdownOutcome;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    /// Temperature nominal, polling.
    #[default]
    Idle,
    /// Threshold breached, shutdown in flight or cooling down.
    Responding,
}

/// What the watchdog last saw and did. Published for the HTTP endpoint.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub started_at_unix: i64,
    pub state: WatchdogState,
    pub threshold_celsius: f64,
    pub last_tick_unix: Option<i64>,
    pub last_temperature_celsius: Option<f64>,
    pub last_sensor_error: Option<String>,
    pub last_response_unix: Option<i64>,
    pub last_outcomes: Vec<ShutdownOutcome>,
    pub responses_total: u64,
    /// Outcomes come from a signaler that delivers nothing.
    pub simulated: bool,
}

impl Status {
    pub fn new(started_at_unix: i64, threshold_celsius: f64) -> Self {
        Self {
            started_at_unix,
            threshold_celsius,
            ..Self::default()
        }
    }

    pub fn record_reading(&mut self, now_unix: i64, reading: &TemperatureReading) {
        self.last_tick_unix = Some(now_unix);
        match reading {
            TemperatureReading::Celsius(v) => {
                self.last_temperature_celsius = Some(*v);
                self.last_sensor_error = None;
            }
            TemperatureReading::Unavailable(reason) => {
                self.last_sensor_error = Some(reason.clone());
            }
        }
    }

    pub fn begin_response(&mut self) {
        self.state = WatchdogState::Responding;
    }

    pub fn finish_response(&mut self, now_unix: i64, outcomes: Vec<ShutdownOutcome>) {
        self.last_response_unix = Some(now_unix);
        self.last_outcomes = outcomes;
        self.responses_total += 1;
    }

    pub fn back_to_idle(&mut self) {
        self.state = WatchdogState::Idle;
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::FinalState;

    #[test]
    fn sensor_error_keeps_last_temperature() {
        let mut status = Status::new(0, 85.0);
        status.record_reading(10, &TemperatureReading::Celsius(70.0));
        status.record_reading(20, &TemperatureReading::Unavailable("timeout".to_string()));

        assert_eq!(status.last_tick_unix, Some(20));
        assert_eq!(status.last_temperature_celsius, Some(70.0));
        assert_eq!(status.last_sensor_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn response_cycle_updates_state() {
        let mut status = Status::new(0, 85.0);
        status.begin_response();
        assert_eq!(status.state, WatchdogState::Responding);

        status.finish_response(
            42,
            vec![ShutdownOutcome {
                pid: 5,
                name: "trex".to_string(),
                state: FinalState::GracefullyExited,
            }],
        );
        status.back_to_idle();

        assert_eq!(status.state, WatchdogState::Idle);
        assert_eq!(status.responses_total, 1);
        assert_eq!(status.last_response_unix, Some(42));
        assert_eq!(status.last_outcomes.len(), 1);
    }
}
