//! Smart Camera CLI
//!
//! Command-line front end: lists camera devices, or opens the first one,
//! starts preview and saves a number of still images.

use clap::{Parser, Subcommand};
use smart_camera::{
    config::{FileConfig, TomlSettingsStore},
    controller::{CameraController, ControllerEvent, Trigger},
    device::{CameraBackend, MockBackend},
    permissions::StaticPermissions,
    session::{CameraSessionManager, SessionConfig},
    storage::{FileNamer, LogMediaIndex, MediaIndex},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smart-camera", version, about = "Camera preview and still capture")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the media root images are saved under.
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Overrides the persisted settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Use the synthetic camera.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List camera devices and their preview sizes.
    Devices,
    /// Capture and save still images.
    Capture {
        /// Number of images to save.
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Preview surface width (defaults to the configured one).
        #[arg(long)]
        width: Option<u32>,
        /// Preview surface height (defaults to the configured one).
        #[arg(long)]
        height: Option<u32>,
    },
}

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Smart Camera v{}", smart_camera::VERSION);

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let backend = select_backend(cli.mock);

    let result = match cli.command {
        Command::Devices => list_devices(backend.as_ref()),
        Command::Capture {
            count,
            width,
            height,
        } => {
            let width = width.unwrap_or(config.preview.surface_width);
            let height = height.unwrap_or(config.preview.surface_height);
            capture(&config, backend, count, width, height).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> AppResult<FileConfig> {
    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(root) = &cli.media_root {
        config.storage.media_root = Some(root.clone());
    }
    if let Some(settings) = &cli.settings {
        config.storage.settings_file = Some(settings.clone());
    }
    config.validate()?;
    Ok(config)
}

fn select_backend(mock: bool) -> Arc<dyn CameraBackend> {
    if !mock {
        #[cfg(feature = "camera")]
        return Arc::new(smart_camera::device::NativeBackend::new());
        #[cfg(not(feature = "camera"))]
        warn!("Built without the `camera` feature, using the mock camera");
    }
    Arc::new(MockBackend::new())
}

fn list_devices(backend: &dyn CameraBackend) -> AppResult<()> {
    let devices = backend.device_ids()?;
    if devices.is_empty() {
        println!("No camera devices found");
        return Ok(());
    }
    for device in devices {
        let sizes = backend
            .output_sizes(&device)?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("{}: {}", device, sizes);
    }
    Ok(())
}

async fn capture(
    config: &FileConfig,
    backend: Arc<dyn CameraBackend>,
    count: u32,
    width: u32,
    height: u32,
) -> AppResult<()> {
    let media_index: Arc<dyn MediaIndex> = Arc::new(LogMediaIndex);
    let session = CameraSessionManager::builder(backend, Arc::new(StaticPermissions::granted()))
        .media_index(media_index.clone())
        .config(SessionConfig::from_file_config(config))
        .build();
    let store = TomlSettingsStore::open(config.storage.settings_file())?;
    let mut controller = CameraController::new(
        session.clone(),
        Arc::new(store),
        FileNamer::new(config.storage.media_root()),
        media_index,
    )?;

    #[cfg(feature = "metrics")]
    spawn_metrics_server(config, session.clone());

    let interrupted = Arc::new(Notify::new());
    let notify = Arc::clone(&interrupted);
    ctrlc::set_handler(move || notify.notify_one())?;

    let mut saved = Vec::new();
    let shots = async {
        controller
            .handle(Trigger::PreviewSurfaceReady { width, height })
            .await?;
        for _ in 0..count {
            controller.handle(Trigger::CaptureRequested).await?;
            if let ControllerEvent::Saved { image, .. } =
                controller.handle(Trigger::SaveConfirmed).await?
            {
                println!("{}", image.path().display());
                saved.push(image);
            }
        }
        Ok::<_, smart_camera::ControllerError>(())
    };

    let outcome = tokio::select! {
        result = shots => result,
        _ = interrupted.notified() => {
            warn!("Interrupted, releasing the camera");
            Ok(())
        }
    };

    // Discards an unreviewed image, then releases the device.
    if controller.pending().is_some() {
        controller.handle(Trigger::CaptureCancelled).await?;
    }
    controller.close().await?;

    let stats = session.stats();
    info!(
        saved = saved.len(),
        failed = stats.captures_failed,
        bytes = stats.bytes_written,
        "Done"
    );
    outcome?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(config: &FileConfig, session: CameraSessionManager) {
    use smart_camera::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    if !config.metrics.enabled() {
        info!("Metrics server disabled");
        return;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            return;
        }
    };
    let server = MetricsServer::new(
        MetricsServerConfig::with_port(config.metrics.port),
        registry,
        session,
    );
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            warn!(error = %e, "Metrics server stopped");
        }
    });
}
