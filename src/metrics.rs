use crate::sensor::TemperatureReading;
use crate::shutdown::{FinalState, ShutdownOutcome};
use crate::state::now_unix;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub watchdog_ticks_total: Counter,
    pub watchdog_sensor_unavailable_total: Counter,
    pub watchdog_threshold_breaches_total: Counter,
    pub watchdog_gpu_temperature_celsius: Gauge,
    pub watchdog_threshold_celsius: Gauge,
    pub watchdog_shutdown_outcomes_total: CounterVec,
    pub watchdog_scrape_count_total: Counter,
    pub watchdog_last_tick_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let watchdog_ticks_total = Counter::with_opts(opts!(
            "watchdog_ticks_total",
            "Number of completed watchdog ticks"
        ))?;
        let watchdog_sensor_unavailable_total = Counter::with_opts(opts!(
            "watchdog_sensor_unavailable_total",
            "Ticks where the GPU temperature could not be read"
        ))?;
        let watchdog_threshold_breaches_total = Counter::with_opts(opts!(
            "watchdog_threshold_breaches_total",
            "Readings at or above the temperature threshold"
        ))?;
        let watchdog_gpu_temperature_celsius = Gauge::with_opts(opts!(
            "watchdog_gpu_temperature_celsius",
            "Last GPU temperature reading (hottest device) in Celsius"
        ))?;
        let watchdog_threshold_celsius = Gauge::with_opts(opts!(
            "watchdog_threshold_celsius",
            "Configured temperature threshold in Celsius"
        ))?;
        let watchdog_shutdown_outcomes_total = CounterVec::new(
            opts!(
                "watchdog_shutdown_outcomes_total",
                "Target processes by final shutdown state"
            ),
            &["state"],
        )?;
        let watchdog_scrape_count_total = Counter::with_opts(opts!(
            "watchdog_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let watchdog_last_tick_timestamp_seconds = Gauge::with_opts(opts!(
            "watchdog_last_tick_timestamp_seconds",
            "Unix timestamp of the last completed tick"
        ))?;

        register(&registry, &watchdog_ticks_total)?;
        register(&registry, &watchdog_sensor_unavailable_total)?;
        register(&registry, &watchdog_threshold_breaches_total)?;
        register(&registry, &watchdog_gpu_temperature_celsius)?;
        register(&registry, &watchdog_threshold_celsius)?;
        register(&registry, &watchdog_shutdown_outcomes_total)?;
        register(&registry, &watchdog_scrape_count_total)?;
        register(&registry, &watchdog_last_tick_timestamp_seconds)?;

        // Export every state from the start so rates work before the first response.
        for state in FinalState::ALL {
            watchdog_shutdown_outcomes_total
                .with_label_values(&[state.as_str()])
                .inc_by(0.0);
        }

        Ok(Arc::new(Self {
            registry,
            watchdog_ticks_total,
            watchdog_sensor_unavailable_total,
            watchdog_threshold_breaches_total,
            watchdog_gpu_temperature_celsius,
            watchdog_threshold_celsius,
            watchdog_shutdown_outcomes_total,
            watchdog_scrape_count_total,
            watchdog_last_tick_timestamp_seconds,
        }))
    }

    pub fn set_threshold(&self, celsius: f64) {
        self.watchdog_threshold_celsius.set(celsius);
    }

    pub fn observe_reading(&self, reading: &TemperatureReading, threshold_celsius: f64) {
        self.watchdog_ticks_total.inc();
        self.watchdog_last_tick_timestamp_seconds
            .set(now_unix() as f64);
        match reading.celsius() {
            Some(celsius) => {
                self.watchdog_gpu_temperature_celsius.set(celsius);
                if celsius >= threshold_celsius {
                    self.watchdog_threshold_breaches_total.inc();
                }
            }
            None => self.watchdog_sensor_unavailable_total.inc(),
        }
    }

    pub fn observe_outcomes(&self, outcomes: &[ShutdownOutcome]) {
        for outcome in outcomes {
            self.watchdog_shutdown_outcomes_total
                .with_label_values(&[outcome.state.as_str()])
                .inc();
        }
    }

    pub fn inc_scrape_count(&self) {
        self.watchdog_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().unwrap()).unwrap()
    }

    #[test]
    fn breach_and_unavailable_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_reading(&TemperatureReading::Celsius(90.0), 85.0);
        metrics.observe_reading(&TemperatureReading::Celsius(60.0), 85.0);
        metrics.observe_reading(&TemperatureReading::Unavailable("x".to_string()), 85.0);

        assert_eq!(metrics.watchdog_ticks_total.get(), 3.0);
        assert_eq!(metrics.watchdog_threshold_breaches_total.get(), 1.0);
        assert_eq!(metrics.watchdog_sensor_unavailable_total.get(), 1.0);
        assert_eq!(metrics.watchdog_gpu_temperature_celsius.get(), 60.0);
    }

    #[test]
    fn outcome_states_are_labelled() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_outcomes(&[ShutdownOutcome {
            pid: 1,
            name: "trex".to_string(),
            state: FinalState::ForceKilled,
        }]);

        let text = render(&metrics);
        assert!(text.contains("watchdog_shutdown_outcomes_total{state=\"force_killed\"} 1"));
        assert!(text.contains("watchdog_shutdown_outcomes_total{state=\"kill_failed\"} 0"));
    }
}
