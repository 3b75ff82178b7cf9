use anyhow::Result;
use beltgate::actuator::RecordingActuator;
use beltgate::app::BeltgateOrchestrator;
use beltgate::{BeltgateConfig, BoundedQueue, TelemetryLayer, TelemetryMessage};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// Capacity of the queue between the logging layer and the log forwarder
const TELEMETRY_QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "beltgate")]
#[command(about = "Multi-camera conveyor inspection with motion triggering and gate actuation")]
#[command(version)]
#[command(long_about = "Watches a conveyor belt with up to three cameras, sends frames of \
passing objects to an object detector, scores the detections and drives a sorting gate over a \
serial line. Results, logs and host status are reported to a backend over HTTP.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "beltgate.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(
        long,
        help = "Perform dry run - initialize components without touching the serial port, then exit"
    )]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily rolling log files")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let started_at = Instant::now();
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let telemetry = Arc::new(BoundedQueue::new("telemetry", TELEMETRY_QUEUE_CAPACITY));
    let log_guard = init_logging(&args, Arc::clone(&telemetry))?;

    info!("Starting Beltgate system v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match BeltgateConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    info!("Beltgate configuration loaded and validated");

    let mut orchestrator =
        BeltgateOrchestrator::new(config, telemetry).with_process_start(started_at);
    if args.dry_run {
        orchestrator = orchestrator.with_actuator(Arc::new(RecordingActuator::new()));
    }

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Beltgate system exited with code: {}", exit_code);

    // Flush the file writer before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("beltgate={}", level)))
}

fn init_logging(
    args: &Args,
    telemetry: Arc<BoundedQueue<TelemetryMessage>>,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
    };

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Configure format based on options
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

    // Optional daily rolling file, always in plain text
    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "beltgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter(log_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter(log_level)))
        .with(file_layer)
        .with(TelemetryLayer::new(telemetry).with_filter(LevelFilter::INFO))
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Beltgate Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    println!("{}", toml::to_string_pretty(&BeltgateConfig::default())?);
    Ok(())
}
