use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use simple_camera::{
    CameraEventKind, CaptureBackend, CapturedImage, EventCategory, EventFilter, EventReceiver,
    SimpleCamera, SimpleCameraConfig, VirtualBackend,
};

#[derive(Parser, Debug)]
#[command(name = "simplecam")]
#[command(about = "Drive a camera session controller against the in-memory camera")]
#[command(version)]
#[command(long_about = "Configures a camera controller on the in-memory capture backend, \
takes a still photo and a silent capture, records a short movie and prints every controller \
event. Useful for checking configuration files and watching the controller's state machine.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "simplecam.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without touching the camera")]
    validate_config: bool,

    /// Print the effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Directory for captured images and the movie file
    #[arg(short, long, default_value = "./captures")]
    output: PathBuf,

    /// How long to record the demo movie
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    record_ms: u64,

    /// Use the front camera
    #[arg(long)]
    front: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = SimpleCameraConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.print_config {
        println!("# Simple camera configuration");
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    info!("Starting simplecam v{}", env!("CARGO_PKG_VERSION"));
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let (width, height) = config.virtual_backend.frame_size;
    let backend = Arc::new(VirtualBackend::with_frame_size(width, height));
    let frame_interval = config.virtual_backend.frame_interval();

    let camera = SimpleCamera::builder()
        .backend(Arc::clone(&backend) as Arc<dyn CaptureBackend>)
        .config(config)
        .build()
        .map_err(|e| {
            error!("Failed to create camera controller: {}", e);
            e
        })?;

    let printer = tokio::spawn(print_events(camera.events().subscribe_filtered(EventFilter::All)));

    let result = run_demo(&camera, &backend, frame_interval, &args).await;

    backend.session().stop_frame_pump();
    camera.stop_running();
    camera.teardown();
    camera.flush();
    printer.abort();

    result
}

async fn run_demo(
    camera: &SimpleCamera,
    backend: &VirtualBackend,
    frame_interval: Duration,
    args: &Args,
) -> Result<()> {
    camera.start_running();
    camera.flush();
    if !camera.is_running() {
        anyhow::bail!("Camera session did not start");
    }
    backend.session().start_frame_pump(frame_interval);

    if args.front && !camera.switch_camera_input_to_front() {
        warn!("Front camera unavailable, staying on the back camera");
    }

    match camera.capture_photo_image_async().await {
        Some(result) => save_capture(&result.image, &args.output.join("photo.jpg"))?,
        None => warn!("Photo capture failed"),
    }
    match camera.capture_silent_image_async().await {
        Some(result) => save_capture(&result.image, &args.output.join("silent.png"))?,
        None => warn!("Silent capture failed"),
    }

    record_movie(camera, &args.output.join("movie.mov"), args.record_ms).await
}

async fn record_movie(camera: &SimpleCamera, destination: &Path, record_ms: u64) -> Result<()> {
    let mut events = camera
        .events()
        .subscribe_filtered(EventFilter::Categories(vec![EventCategory::Recording]));
    camera.set_movie_mode();
    if !camera.start_record_movie(destination) {
        anyhow::bail!("Could not start recording to {}", destination.display());
    }

    tokio::time::sleep(Duration::from_millis(record_ms)).await;
    camera.stop_record_movie();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let CameraEventKind::RecordingFinished { error, .. } = event.kind {
                return Ok(error);
            }
        }
        Err(anyhow::anyhow!("Event bus closed while recording"))
    })
    .await
    .context("Timed out waiting for the recording to finish")??;

    match finished {
        Some(error) => warn!("Recording finished with error: {}", error),
        None => info!("Movie written to {}", destination.display()),
    }
    camera.set_photo_mode();
    Ok(())
}

fn save_capture(image: &CapturedImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    let (width, height) = image.display_size();
    info!("Saved {}x{} image to {}", width, height, path.display());
    Ok(())
}

async fn print_events(mut receiver: EventReceiver) {
    while let Some(event) = receiver.recv().await {
        println!(
            "[{}] {:?}: {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.category(),
            event.description()
        );
    }
    if receiver.skipped() > 0 {
        warn!("Event printer missed {} events", receiver.skipped());
    }
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
        .unwrap_or_else(|_| EnvFilter::new(format!("simple_camera={0},simplecam={0}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}
