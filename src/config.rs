use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Upper bound for `poll_interval_secs` and `grace_period_secs` (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_threshold_celsius", alias = "temp_threshold")]
    pub threshold_celsius: f64,
    #[serde(default = "default_poll_interval_secs", alias = "check_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_period_secs", alias = "grace_period")]
    pub grace_period_secs: u64,
    #[serde(default = "default_target_process_names", alias = "trex_process_names")]
    pub target_process_names: Vec<String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_celsius: default_threshold_celsius(),
            poll_interval_secs: default_poll_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            target_process_names: default_target_process_names(),
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// tracing has no CRITICAL; it maps onto ERROR.
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warning),
            "ERROR" | "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(value: LogLevel) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON in {path}: {source}")]
    ParseJson {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Where the effective configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    File(String),
    Defaults { path: String, reason: ConfigError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let mut cfg: Config = match Format::for_path(path_ref) {
            Format::Yaml => serde_yaml::from_str(&text).map_err(|source| {
                ConfigError::ParseYaml {
                    path: path_display,
                    source,
                }
            })?,
            Format::Json => serde_json::from_str(&text).map_err(|source| {
                ConfigError::ParseJson {
                    path: path_display,
                    source,
                }
            })?,
        };

        cfg.target_process_names = normalize_target_names(cfg.target_process_names);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Missing or malformed files never stop the watchdog; defaults are used
    /// instead and the caller is told why.
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, ConfigSource) {
        let path_display = path.as_ref().display().to_string();
        match Self::load_from_file(path) {
            Ok(cfg) => (cfg, ConfigSource::File(path_display)),
            Err(reason) => (
                Self::default(),
                ConfigSource::Defaults {
                    path: path_display,
                    reason,
                },
            ),
        }
    }

    pub fn write_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        Self::default().write_to_file(path)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        let text = match Format::for_path(path_ref) {
            Format::Yaml => self.to_yaml()?,
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|err| ConfigError::Serialize(err.to_string()))?,
        };
        fs::write(path_ref, text).map_err(|source| ConfigError::Write {
            path: path_ref.display().to_string(),
            source,
        })
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|err| ConfigError::Serialize(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold_celsius.is_finite() || self.threshold_celsius <= 0.0 {
            return Err(ConfigError::Validation(
                "threshold_celsius must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.poll_interval_secs) {
            return Err(ConfigError::Validation(format!(
                "poll_interval_secs must be between 1 and {MAX_DURATION_SECS}"
            )));
        }
        if self.grace_period_secs > MAX_DURATION_SECS {
            return Err(ConfigError::Validation(format!(
                "grace_period_secs must be <= {MAX_DURATION_SECS}"
            )));
        }

        Ok(())
    }
}

/// Target names form a case-insensitive ordered set: blanks are dropped and
/// later duplicates collapse into the first spelling.
fn normalize_target_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
        .collect()
}

const fn default_threshold_celsius() -> f64 {
    85.0
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_grace_period_secs() -> u64 {
    30
}

fn default_target_process_names() -> Vec<String> {
    ["t-rex.exe", "trex.exe", "t-rex", "trex"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
