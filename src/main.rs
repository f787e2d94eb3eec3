mod config;
mod http;
mod metrics;
mod process;
mod sensor;
mod shutdown;
mod signal;
mod state;
#[cfg(test)]
mod testing;
mod watchdog;

use axum::serve;
use clap::Parser;
use config::{Config, ConfigError, ConfigSource, LogLevel};
use metrics::Metrics;
use process::SysinfoDirectory;
use sensor::{CommandSensor, TemperatureReading};
use shutdown::ShutdownOrchestrator;
use signal::{platform_signaler, Signaler, SimulatedSignaler};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use watchdog::{Inspection, Watchdog};

#[derive(Parser, Debug)]
#[command(name = "gpu-watchdog")]
#[command(version)]
#[command(about = "Stops mining software when the GPU runs too hot")]
struct Cli {
    /// Configuration file (.json or .yaml)
    #[arg(long, short = 'c', default_value = "gpu_watchdog.yaml")]
    config: PathBuf,
    /// Write the default configuration to --config and exit
    #[arg(long)]
    create_config: bool,
    /// Print the default configuration as YAML and exit
    #[arg(long)]
    print_default_config: bool,
    /// Temperature threshold in Celsius
    #[arg(long, short = 't', value_parser = parse_celsius)]
    temp_threshold: Option<f64>,
    /// Seconds between temperature checks
    #[arg(long, short = 'i', value_parser = clap::value_parser!(u64).range(1..=config::MAX_DURATION_SECS))]
    check_interval: Option<u64>,
    /// Check temperature and processes once, send nothing
    #[arg(long, conflicts_with = "simulate")]
    dry_run: bool,
    /// Run the watchdog but only report the signals it would send
    #[arg(long, alias = "test-mode")]
    simulate: bool,
    /// File that receives a plain-text copy of the log
    #[arg(long, default_value = "gpu_watchdog.log")]
    log_file: PathBuf,
    /// Serve /healthz, /metrics and /api/state on this address
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.print_default_config {
        match Config::default().to_yaml() {
            Ok(yaml) => print!("{yaml}"),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.create_config {
        match Config::write_default(&cli.config) {
            Ok(()) => println!("Default configuration saved to {}", cli.config.display()),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
        return;
    }

    let (mut cfg, source) = Config::load_or_default(&cli.config);
    if let Some(threshold) = cli.temp_threshold {
        cfg.threshold_celsius = threshold;
    }
    if let Some(interval) = cli.check_interval {
        cfg.poll_interval_secs = interval;
    }

    init_tracing(cfg.log_level, &cli.log_file);
    match source {
        ConfigSource::File(path) => info!(path = %path, "configuration loaded"),
        ConfigSource::Defaults {
            path,
            reason: ConfigError::Read { source, .. },
        } if source.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path, "no configuration file, using defaults")
        }
        ConfigSource::Defaults { path, reason } => {
            warn!(path = %path, reason = %reason, "failed to load configuration, using defaults")
        }
    }

    let sensor = CommandSensor::nvidia_smi();
    let directory = SysinfoDirectory::new();

    if cli.dry_run {
        let orchestrator = ShutdownOrchestrator::new(Box::new(SimulatedSignaler));
        let mut dog = Watchdog::new(cfg, sensor, directory, orchestrator);
        print_inspection(&dog.inspect().await);
        return;
    }

    let signaler: Box<dyn Signaler> = if cli.simulate {
        println!("=== SIMULATE MODE - no signals will be sent ===");
        Box::new(SimulatedSignaler)
    } else {
        platform_signaler()
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let mut dog = Watchdog::new(cfg, sensor, directory, ShutdownOrchestrator::new(signaler))
        .with_metrics(metrics.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        info!("received interrupt signal, shutting down watchdog");
        let _ = stop_tx.send(true);
    });

    let http_task = cli.metrics_listen.map(|addr| {
        let metrics = metrics.clone();
        let status = dog.status();
        let mut shutdown_rx = stop_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, status);
            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, listen = %addr, "failed to start HTTP server");
                    return;
                }
            };
            info!(listen = %addr, "HTTP server listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    });

    dog.run(stop_rx).await;

    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn init_tracing(level: LogLevel, log_file: &Path) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter().to_string()));
    let file_level = level.as_filter().min(LevelFilter::INFO);

    let (file_layer, file_error) = match OpenOptions::new().create(true).append(true).open(log_file)
    {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(file_level),
            ),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(console_filter))
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        warn!(path = %log_file.display(), error = %err, "log file unavailable, logging to console only");
    }
}

async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            error!(error = %err, "failed to listen for Ctrl+C");
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "failed to listen for SIGTERM"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn print_inspection(inspection: &Inspection) {
    println!("=== DRY RUN MODE ===");
    let celsius = match &inspection.reading {
        TemperatureReading::Celsius(c) => *c,
        TemperatureReading::Unavailable(reason) => {
            println!("Could not read GPU temperature: {reason}");
            return;
        }
    };

    println!("Current GPU temperature: {celsius}°C");
    println!("Threshold: {}°C", inspection.threshold_celsius);
    if !inspection.exceeds_threshold() {
        println!("Temperature is within safe range");
        return;
    }

    println!("Temperature EXCEEDS threshold!");
    match inspection.targets.as_deref() {
        Some(targets) if !targets.is_empty() => {
            println!("Found {} target process(es):", targets.len());
            for target in targets {
                println!("  - {target}");
            }
        }
        _ => println!("No target processes found"),
    }
}

fn parse_celsius(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !v.is_finite() || v <= 0.0 {
        return Err("threshold must be a positive number".to_string());
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_and_modes_parse() {
        let cli = Cli::try_parse_from([
            "gpu-watchdog",
            "-c",
            "watchdog.json",
            "-t",
            "80.5",
            "-i",
            "3",
            "--test-mode",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("watchdog.json"));
        assert_eq!(cli.temp_threshold, Some(80.5));
        assert_eq!(cli.check_interval, Some(3));
        assert!(cli.simulate);
        assert!(!cli.dry_run);
    }

    #[test]
    fn every_option_has_help_text() {
        let cmd = Cli::command();
        for arg in cmd.get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            assert!(arg.get_help().is_some(), "--{} has no help", arg.get_id());
        }
    }

    #[test]
    fn dry_run_and_simulate_conflict() {
        assert!(Cli::try_parse_from(["gpu-watchdog", "--dry-run", "--simulate"]).is_err());
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        assert!(Cli::try_parse_from(["gpu-watchdog", "-i", "0"]).is_err());
        assert!(Cli::try_parse_from(["gpu-watchdog", "-i", "86401"]).is_err());
        assert!(Cli::try_parse_from(["gpu-watchdog", "-i", "18446744073709551615"]).is_err());
        assert!(Cli::try_parse_from(["gpu-watchdog", "-t", "-5"]).is_err());
        assert!(Cli::try_parse_from(["gpu-watchdog", "-t", "hot"]).is_err());
    }
}
