//! Vigil Server - motion recorder with a web UI
//!
//! Opens the camera when the first viewer connects, records one clip per
//! motion episode and serves the live preview, status, recordings and the
//! motion log over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Webcam 0, web UI on port 5000
//! vigil-server
//!
//! # Synthetic frames (development)
//! vigil-server --test-source
//!
//! # Second camera, recordings elsewhere, token required
//! VIGIL_DEVICE_INDEX=1 VIGIL_RECORDINGS_DIR=/var/lib/vigil VIGIL_ACCESS_TOKEN=s3cret vigil-server
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use vigil::capture::{CaptureConfig, DeviceSource, FrameSource};
use vigil::recording::{EncoderBackend, FfmpegEncoderBackend, RecorderConfig, RecordingLibrary};
use vigil::service::{CaptureService, EncoderFactory, ServiceConfig, SourceOpener};
use vigil::web::{AccessGate, OpenAccess, TokenGate};
use vigil::{DetectorConfig, EventLog, StatusStore};

/// Server configuration from environment/args
struct Config {
    capture: CaptureConfig,
    recordings_dir: PathBuf,
    log_path: PathBuf,
    web_port: u16,
    buffer_size: usize,
    jpeg_quality: u8,
    min_recording_kb: u64,
    cooldown_secs: u64,
    access_token: Option<String>,
    test_source: bool,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn from_env() -> Self {
        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            device_index: env_or("VIGIL_DEVICE_INDEX", defaults.device_index),
            width: env_or("VIGIL_WIDTH", defaults.width),
            height: env_or("VIGIL_HEIGHT", defaults.height),
            fps: env_or("VIGIL_FPS", defaults.fps),
            input_format: std::env::var("VIGIL_INPUT_FORMAT").unwrap_or(defaults.input_format),
            ffmpeg_path: std::env::var("VIGIL_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
        };

        let recordings_dir = std::env::var("VIGIL_RECORDINGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("recordings"));

        let log_path = std::env::var("VIGIL_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs/motion_log.txt"));

        let access_token = std::env::var("VIGIL_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let test_source = std::env::args().any(|arg| arg == "--test-source");

        Self {
            capture,
            recordings_dir,
            log_path,
            web_port: env_or("VIGIL_WEB_PORT", 5000),
            buffer_size: env_or("VIGIL_BUFFER_SIZE", vigil::stream::DEFAULT_CAPACITY),
            jpeg_quality: env_or("VIGIL_JPEG_QUALITY", vigil::stream::DEFAULT_QUALITY),
            min_recording_kb: env_or("VIGIL_MIN_RECORDING_KB", 100),
            cooldown_secs: env_or("VIGIL_COOLDOWN_SECS", 5),
            access_token,
            test_source,
        }
    }

    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            detector: DetectorConfig::default(),
            recorder: RecorderConfig {
                output_dir: self.recordings_dir.clone(),
                fps: self.capture.fps,
                min_file_bytes: self.min_recording_kb * 1024,
                cooldown: Duration::from_secs(self.cooldown_secs),
                ..Default::default()
            },
            stream_capacity: self.buffer_size,
            jpeg_quality: self.jpeg_quality,
        }
    }

    fn source_opener(&self) -> Result<SourceOpener> {
        let capture = self.capture.clone();
        if self.test_source {
            return test_source_opener(capture);
        }
        Ok(Arc::new(move || {
            DeviceSource::open(capture.clone()).map(|s| Box::new(s) as Box<dyn FrameSource>)
        }))
    }
}

#[cfg(feature = "test-source")]
fn test_source_opener(capture: CaptureConfig) -> Result<SourceOpener> {
    use vigil::capture::{TestSource, TestSourceConfig};

    Ok(Arc::new(move || {
        let config = TestSourceConfig {
            width: capture.width,
            height: capture.height,
            fps: capture.fps,
            frame_count: None,
            realtime: true,
        };
        // a 3 s intruder every 10 s
        let period = u64::from(capture.fps) * 10;
        let active = u64::from(capture.fps) * 3;
        Ok(Box::new(TestSource::intruder(config, period, active)) as Box<dyn FrameSource>)
    }))
}

#[cfg(not(feature = "test-source"))]
fn test_source_opener(_capture: CaptureConfig) -> Result<SourceOpener> {
    anyhow::bail!("--test-source requires the `test-source` feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::from_env();

    info!("Vigil Server starting");
    if config.test_source {
        info!("  Source: synthetic test frames");
    } else {
        info!(
            "  Source: {} ({})",
            config.capture.device_name(),
            config.capture.input_format
        );
    }
    info!(
        "  Capture: {}x{} @ {}fps",
        config.capture.width, config.capture.height, config.capture.fps
    );
    info!("  Recordings: {:?}", config.recordings_dir);
    info!("  Motion log: {:?}", config.log_path);
    info!("  Web port: {}", config.web_port);
    info!(
        "  Access: {}",
        if config.access_token.is_some() { "token required" } else { "open" }
    );

    let events = EventLog::open(&config.log_path)
        .with_context(|| format!("Failed to open motion log {:?}", config.log_path))?;
    let status = StatusStore::new();

    let ffmpeg_path = config.capture.ffmpeg_path.clone();
    let encoder: EncoderFactory = Arc::new(move || {
        Box::new(FfmpegEncoderBackend::new(ffmpeg_path.clone())) as Box<dyn EncoderBackend>
    });

    // Graceful shutdown
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let service = CaptureService::with_shutdown(
        config.service_config(),
        config.source_opener()?,
        encoder,
        events,
        status,
        cancel.clone(),
        tracker.clone(),
    );

    let gate: Arc<dyn AccessGate> = match config.access_token.clone() {
        Some(token) => Arc::new(TokenGate::new(token)),
        None => Arc::new(OpenAccess),
    };
    let library = RecordingLibrary::new(&config.recordings_dir, "mp4");

    // Spawn web server
    let app = vigil::web::router(service.clone(), library, gate);
    let web_bind = SocketAddr::from(([0, 0, 0, 0], config.web_port));
    let web_cancel = cancel.clone();
    tracker.spawn(async move {
        if let Err(e) = vigil::web::start(app, web_bind, web_cancel).await {
            error!("Web server error: {}", e);
        }
    });

    run_headless(service, cancel, tracker).await
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vigil=info".parse().unwrap()),
        )
        .init();
}

/// Log stats periodically, shut down on SIGINT
async fn run_headless(
    service: CaptureService,
    cancel: CancellationToken,
    tracker: TaskTracker,
) -> Result<()> {
    let mut stats_interval = interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = service.stats();
                let status = service.status();
                info!(
                    "Stats: capture {}, {} viewers, {} frames published, motion {}",
                    if stats.running { "running" } else { "idle" },
                    stats.viewers,
                    stats.frames_published,
                    status.motion
                );
            }
        }
    }

    // finalize the open recording before the runtime goes away
    service.stop().await;
    cancel.cancel();
    tracker.close();

    if tokio::time::timeout(Duration::from_secs(5), tracker.wait()).await.is_err() {
        warn!("Shutdown timed out after 5s");
    }
    Ok(())
}
