use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use sortyx::{SortyxConfig, SortyxOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "sortyx")]
#[command(about = "Real-time waste scan service with hand-held item classification")]
#[command(version)]
#[command(long_about = "Sortyx watches camera frames for a hand holding an item, crops the item, \
classifies it with a local vision model or a reasoning service, and tells the client which bin \
it belongs in. Bin fill sensors report through the same service, and observers receive results \
and sensor updates over a WebSocket.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sortyx.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build components but don't start them
    #[arg(long, help = "Perform dry run - build components but don't load models or serve")]
    dry_run: bool,

    /// Use in-process mock models and reasoning service
    #[arg(long, help = "Use mock models instead of the inference backend (demos and local testing)")]
    mock_models: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting Sortyx v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SortyxConfig::load_from_file(&args.config) {
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
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    info!("Effective configuration: {:?}", config.redacted());

    let mut orchestrator = SortyxOrchestrator::from_config(config, args.mock_models)
        .await
        .map_err(|e| {
            error!("Failed to create orchestrator: {}", e);
            e
        })?;

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize service: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components built but not started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start service: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("Service error during execution: {}", e);
        e
    })?;

    info!("Sortyx exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<()> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("sortyx={}", log_level)));

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

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Sortyx Configuration File");
    println!("# Every key is optional; environment variables override it as");
    println!("# SORTYX_<SECTION>__<KEY>, e.g. SORTYX_SERVER__PORT=9000");
    println!();

    let default_config = r#"[server]
# IP address to bind to
ip = "0.0.0.0"
# Port to listen on
port = 8000
# Allow cross-origin requests from any origin
permissive_cors = true

[models]
# Inference backend serving the vision models
inference_url = "http://127.0.0.1:9100"
pose_model = "yolov8n-pose"
detection_model = "yolov8n"
classification_model = "waste-classifier"
# Per-request timeout against the inference backend
request_timeout_ms = 2000
# Inference calls in flight across all sessions
max_concurrent_inference = 4

[detector]
wrist_confidence_threshold = 0.3
# Below this the forearm direction is taken from the shoulder
elbow_confidence_threshold = 0.2
object_confidence_threshold = 0.3
# Minimum overlap between the object box and the wrist neighborhood
iou_threshold = 0.1
# Fraction of the forearm to extend past the wrist
hand_extension = 0.35
neighborhood_half_size = 120.0
timeout_ms = 300
# Frames are scaled down so their longest side fits
max_frame_dimension = 1280

[extractor]
# Padding around the object as a fraction of its size
margin_fraction = 0.1
jpeg_quality = 90

[router]
# "model" or "llm"
default_strategy = "model"
min_acceptance_confidence = 0.6
fallback_enabled = true
# Multiplier for answers that name no known category
unrecognized_penalty = 0.5

[llm]
# Falls back to GEMINI_API_KEY when unset
# api_key = "..."
endpoint = "https://generativelanguage.googleapis.com/v1beta"
# Tried in order
models = ["gemini-2.0-flash", "gemini-2.5-flash"]
timeout_ms = 8000
temperature = 0.4
max_output_tokens = 1024

[session]
startup_delay_ms = 1000
poll_interval_ms = 500
presence_confidence_threshold = 0.3
classifying_timeout_ms = 12000
# How long a result stays on display, then the reset delay
display_duration_ms = 3000
reset_delay_ms = 1000

[hub]
event_capacity = 256
command_capacity = 256
# Bin fill levels (percent) for the warning and full states
warning_level = 70.0
full_level = 90.0
"#;

    println!("{}", default_config);
}
