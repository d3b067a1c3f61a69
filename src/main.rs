use anyhow::{anyhow, Result};
use clap::Parser;
use qhy9_driver::{
    CameraSdk, DriverConfig, DriverRuntime, DriverSettings, EventBus, EventHost, FrameStore,
    Qhy9Controller, QhySdk, SettingsStore, SimulatedSdk,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

#[derive(Parser, Debug)]
#[command(name = "qhy9-driver")]
#[command(about = "Exposure and cooling driver for the QHY9 cooled CCD camera")]
#[command(version)]
#[command(long_about = "Drives a QHY9 cooled CCD through libqhyccd: connection, timed single \
exposures with shutter control, binning, and closed-loop sensor cooling. Commands are read \
line by line from stdin; completed frames are written to the configured frame directory.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "qhy9.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the driver")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't run
    #[arg(long, help = "Perform dry run - build the driver but don't run it")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH", help = "Write logs to a file in addition to stderr")]
    log_file: Option<String>,

    /// Use the in-memory camera instead of libqhyccd
    #[arg(long, help = "Run against a simulated camera")]
    simulate: bool,

    /// Connect to the camera at startup
    #[arg(long, help = "Connect to the camera immediately after startup")]
    connect: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting QHY9 driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DriverConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let exit_code = if args.simulate {
        info!("Using simulated camera");
        run_driver(config, SimulatedSdk::new(), &args).await?
    } else {
        let sdk = QhySdk::new(config.device.sdk_library.clone());
        run_driver(config, sdk, &args).await?
    };

    info!("QHY9 driver exited with code: {}", exit_code);

    // process::exit skips destructors, so flush the log file first
    drop(_log_guard);

    // A blocking stdin read would otherwise hold the runtime open
    std::process::exit(exit_code);
}

async fn run_driver<S: CameraSdk>(config: DriverConfig, sdk: S, args: &Args) -> Result<i32> {
    let event_bus = EventBus::new(config.storage.event_bus_capacity);

    let settings_store = SettingsStore::new(&config.storage.settings_file);
    let settings = settings_store.load_or(DriverSettings::from_sensor(&config.sensor));

    let frame_task = if config.storage.save_frames {
        Some(
            FrameStore::from_config(&config.storage)
                .start(&event_bus)
                .await
                .map_err(|e| {
                    error!("Failed to start frame store: {}", e);
                    e
                })?,
        )
    } else {
        None
    };

    let host = EventHost::new(event_bus.clone(), settings_store);
    let controller = Qhy9Controller::new(config, sdk, host, settings);

    if args.dry_run {
        info!("Dry run mode - driver initialized but not started");
        println!("✓ Dry run completed successfully - driver initialized");
        return Ok(0);
    }

    let mut runtime = DriverRuntime::new(controller);

    if args.connect {
        if let Err(e) = runtime.controller_mut().connect() {
            error!("Initial connect failed: {}", e);
        }
    }

    let reason = runtime
        .run(BufReader::new(tokio::io::stdin()))
        .await
        .map_err(|e| {
            error!("Driver error during execution: {}", e);
            e
        })?;
    info!("Driver stopped: {}", reason);

    // Closing the bus lets the frame store drain and finish
    drop(runtime);
    drop(event_bus);
    if let Some(task) = frame_task {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("Frame store did not finish writing in time");
        }
    }

    Ok(0)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qhy9_driver={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_writer, guard) = match args.log_file.as_deref() {
        Some(path) => {
            let (writer, guard) = log_file_writer(Path::new(path))?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Non-blocking writer appending to `path`; buffered lines are written when the guard drops
fn log_file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# QHY9 Driver Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Any key can be overridden from the environment, e.g. QHY9_TIMING__TICK_MS=500");
    println!();
    println!("{}", toml::to_string_pretty(&DriverConfig::default())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_tail_is_written_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.log");

        let (mut writer, guard) = log_file_writer(&path).unwrap();
        writer.write_all(b"QHY9 driver exited with code: 0\n").unwrap();
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("exited with code: 0"));
    }

    #[test]
    fn test_log_file_path_needs_a_file_name() {
        assert!(log_file_writer(Path::new("/")).is_err());
    }
}
