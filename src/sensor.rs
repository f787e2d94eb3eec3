//! GPU temperature sampling.
//!
//! The sensor is an external command that prints one Celsius value per line,
//! one line per device. `nvidia-smi` is the default.

use std::future::Future;
use std::io;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_secs(10);

const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=temperature.gpu",
    "--format=csv,noheader,nounits",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TemperatureReading {
    /// Hottest device, in Celsius.
    Celsius(f64),
    Unavailable(String),
}

impl TemperatureReading {
    pub fn celsius(&self) -> Option<f64> {
        match self {
            TemperatureReading::Celsius(v) => Some(*v),
            TemperatureReading::Unavailable(_) => None,
        }
    }
}

impl From<Result<f64, SensorError>> for TemperatureReading {
    fn from(value: Result<f64, SensorError>) -> Self {
        match value {
            Ok(v) => TemperatureReading::Celsius(v),
            Err(err) => TemperatureReading::Unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{program} not found; make sure the GPU driver tools are installed and in PATH")]
    NotFound { program: String },
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {code}: {stderr}")]
    Exit {
        program: String,
        code: String,
        stderr: String,
    },
    #[error("no valid temperature readings in {program} output")]
    NoReadings { program: String },
}

pub trait TemperatureSource {
    fn sample(&self) -> impl Future<Output = TemperatureReading> + Send;
}

/// Runs an external command and takes the maximum of the values it prints.
#[derive(Debug, Clone)]
pub struct CommandSensor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSensor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn nvidia_smi() -> Self {
        Self::new(
            "nvidia-smi",
            NVIDIA_SMI_ARGS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_SENSOR_TIMEOUT,
        )
    }

    async fn query(&self) -> Result<f64, SensorError> {
        let output = self.run().await?;
        if !output.status.success() {
            return Err(SensorError::Exit {
                program: self.program.clone(),
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let temps = parse_temperatures(&text);
        let max = temps.iter().copied().reduce(f64::max);
        match max {
            Some(max) => {
                debug!(program = %self.program, ?temps, max, "gpu temperatures");
                Ok(max)
            }
            None => Err(SensorError::NoReadings {
                program: self.program.clone(),
            }),
        }
    }

    async fn run(&self) -> Result<Output, SensorError> {
        match self.run_program(&self.program).await {
            Err(SensorError::NotFound { .. }) if cfg!(target_os = "windows") => {
                self.run_program(r"C:\Windows\System32\nvidia-smi.exe")
                    .await
                    .map_err(|_| SensorError::NotFound {
                        program: self.program.clone(),
                    })
            }
            other => other,
        }
    }

    async fn run_program(&self, program: &str) -> Result<Output, SensorError> {
        let mut cmd = Command::new(program);
        cmd.args(&self.args).kill_on_drop(true);

        match time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => Err(SensorError::NotFound {
                program: program.to_string(),
            }),
            Ok(Err(source)) => Err(SensorError::Spawn {
                program: program.to_string(),
                source,
            }),
            Err(_elapsed) => Err(SensorError::Timeout {
                program: program.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

impl TemperatureSource for CommandSensor {
    async fn sample(&self) -> TemperatureReading {
        self.query().await.into()
    }
}

/// Lines that are not finite non-negative numbers (`[N/A]`, `ERR!`) are
/// dropped one by one.
pub fn parse_temperatures(text: &str) -> Vec<f64> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
            _ => {
                debug!(line, "discarding unparsable temperature line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_valid_lines_only() {
        let temps = parse_temperatures("71\n  [N/A]\n\n83.5 \n-4\nNaN\nERR!\n");
        assert_eq!(temps, vec![71.0, 83.5]);
    }

    #[test]
    fn parse_of_garbage_is_empty() {
        assert!(parse_temperatures("No devices were found\n").is_empty());
    }

    #[test]
    fn reading_from_error_is_unavailable_with_reason() {
        let reading: TemperatureReading = Err(SensorError::NoReadings {
            program: "nvidia-smi".to_string(),
        })
        .into();
        match reading {
            TemperatureReading::Unavailable(reason) => assert!(reason.contains("nvidia-smi")),
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandSensor {
        CommandSensor::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hottest_device_wins() {
        let reading = sh("echo 64; echo 91; echo '[N/A]'; echo 70").sample().await;
        assert_eq!(reading, TemperatureReading::Celsius(91.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_unavailable() {
        let reading = sh("echo 'driver mismatch' >&2; exit 1").sample().await;
        match reading {
            TemperatureReading::Unavailable(reason) => {
                assert!(reason.contains("exited with 1"), "{reason}");
                assert!(reason.contains("driver mismatch"), "{reason}");
            }
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unparsable_output_is_unavailable() {
        let reading = sh("echo N/A").sample().await;
        assert!(reading.celsius().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_sensor_times_out() {
        let sensor = CommandSensor::new(
            "sh",
            vec!["-c".to_string(), "sleep 5; echo 50".to_string()],
            Duration::from_millis(100),
        );
        match sensor.sample().await {
            TemperatureReading::Unavailable(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let sensor = CommandSensor::new(
            "definitely-not-a-real-sensor-tool",
            vec![],
            Duration::from_secs(1),
        );
        match sensor.sample().await {
            TemperatureReading::Unavailable(reason) => assert!(reason.contains("not found")),
            other => panic!("unexpected reading {other:?}"),
        }
    }
}
