//! CamCap daemon
//!
//! Main entry point for the capture daemon.

use camcap::{
    capture::CaptureService,
    cleanup::CleanupWorker,
    gpio::{GpioBackend, GpioService, MockBackend},
    grabber::FrameGrabber,
    health::HealthMonitor,
    settings::SettingsStore,
    state::AppState,
    store::ImageStore,
    uploader::UploadWorker,
    web_api::{self, SessionStore},
};
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fixed env-file path, relative to the working directory.
const ENV_FILE: &str = ".env";

/// Fixed database path, relative to the working directory.
const DB_FILE: &str = "camcap.db";

/// Deadline for worker tasks to drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "camcap", version, about = "Button-triggered RTSP capture daemon")]
struct Args {
    /// Capture once from every camera and exit
    #[arg(long)]
    test_capture: bool,

    /// Claim GPIO lines, print pin states and exit
    #[arg(long)]
    test_gpio: bool,

    /// Run retention cleanup once and exit
    #[arg(long)]
    cleanup_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (RUST_LOG and friends)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camcap=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting CamCap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Arc::new(SettingsStore::load(ENV_FILE)?);
    {
        let s = settings.current().await;
        tracing::info!(
            bind = %format!("{}:{}", s.bind_ip, s.bind_port),
            gpio_enabled = s.gpio_enabled,
            trigger_enabled = s.gpio_trigger_enabled,
            upload_enabled = s.upload_enabled,
            retention_days = s.image_retention_days,
            storage = %s.image_storage_path.display(),
            "Configuration loaded"
        );
        for camera in &s.cameras {
            tracing::info!(
                source = %camera.tag,
                enabled = camera.enabled,
                pin = camera.gpio_pin,
                "Camera slot"
            );
        }

        // Storage directory must exist before anything captures into it
        std::fs::create_dir_all(&s.image_storage_path)?;
    }

    // Open the image store; failure here is fatal
    let store = ImageStore::open(DB_FILE).await?;
    let repo = store.repository();

    let capture = Arc::new(CaptureService::new(settings.clone(), repo.clone()));

    // One-shot modes
    if args.test_capture {
        return test_capture_mode(&settings, &capture).await;
    }
    if args.cleanup_now {
        let cleanup = CleanupWorker::new(settings.clone(), repo.clone());
        let run = cleanup.run_once().await?;
        tracing::info!(
            deleted = run.deleted,
            bytes = run.bytes_reclaimed,
            "Cleanup complete"
        );
        return Ok(());
    }

    match FrameGrabber::check_tool().await {
        Ok(version) => tracing::info!(ffmpeg = %version, "Codec tool found"),
        Err(_) => tracing::warn!("ffmpeg not found on PATH, captures will fail"),
    }

    let backend = gpio_backend();
    let gpio = Arc::new(GpioService::new(settings.clone(), capture.clone(), backend));

    if args.test_gpio {
        return test_gpio_mode(&gpio).await;
    }

    gpio.start().await;

    // Background workers
    let (stop_tx, stop_rx) = watch::channel(false);

    let uploader = Arc::new(UploadWorker::new(settings.clone(), repo.clone()));
    let uploader_task = tokio::spawn(uploader.clone().run(stop_rx.clone()));

    let health = Arc::new(HealthMonitor::new(settings.clone()));
    let health_task = tokio::spawn(health.clone().run(stop_rx.clone()));

    let cleanup = Arc::new(CleanupWorker::new(settings.clone(), repo.clone()));
    let cleanup_task = tokio::spawn(cleanup.clone().run(stop_rx.clone()));

    // Create application state
    let state = AppState {
        settings: settings.clone(),
        repo,
        capture,
        gpio: gpio.clone(),
        uploader,
        health,
        cleanup,
        sessions: Arc::new(SessionStore::new()),
        started_at: Instant::now(),
    };

    // Create router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server; bind failure is fatal
    let addr = {
        let s = settings.current().await;
        format!("{}:{}", s.bind_ip, s.bind_port)
    };
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown: flag the workers, wait with a bounded deadline, then
    // release GPIO lines no matter what
    tracing::info!("Shutting down");
    let _ = stop_tx.send(true);
    for (name, task) in [
        ("uploader", uploader_task),
        ("health", health_task),
        ("cleanup", cleanup_task),
    ] {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!(worker = name, "Worker did not stop within the deadline");
        }
    }
    gpio.stop().await;

    tracing::info!("CamCap stopped");
    Ok(())
}

fn gpio_backend() -> Arc<dyn GpioBackend> {
    #[cfg(feature = "rpi-gpio")]
    {
        match camcap::gpio::RppalBackend::new() {
            Ok(backend) => return Arc::new(backend),
            Err(e) => {
                tracing::warn!(error = %e, "GPIO hardware unavailable, using mock backend");
            }
        }
    }
    Arc::new(MockBackend::new())
}

async fn test_capture_mode(
    settings: &Arc<SettingsStore>,
    capture: &Arc<CaptureService>,
) -> anyhow::Result<()> {
    let s = settings.current().await;
    for camera in &s.cameras {
        tracing::info!(source = %camera.tag, "Testing capture");
        match capture.capture_blocking(&camera.tag).await {
            Ok(record) => {
                tracing::info!(source = %camera.tag, filename = %record.filename, "Capture OK")
            }
            Err(e) => tracing::error!(source = %camera.tag, error = %e, "Capture failed"),
        }
    }
    Ok(())
}

async fn test_gpio_mode(gpio: &Arc<GpioService>) -> anyhow::Result<()> {
    gpio.start().await;
    if !gpio.available() {
        tracing::error!("GPIO service not available");
        return Ok(());
    }
    for (source, pressed) in gpio.pin_states().await {
        tracing::info!(source = %source, pressed = ?pressed, "Pin state");
    }
    gpio.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
