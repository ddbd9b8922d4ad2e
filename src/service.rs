//! On-demand capture supervisor
//!
//! The device is opened lazily by the first viewer (or an explicit start) and
//! released by `stop`. At most one pipeline runs at a time; every viewer
//! subscribes to the same publisher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::detect::{DetectorConfig, MotionDetector};
use crate::error::{CaptureError, ServiceError};
use crate::events::EventLog;
use crate::pipeline::{Pipeline, PipelineSummary, RunOutcome};
use crate::recording::{EncoderBackend, RecorderConfig, RecordingController};
use crate::status::{MotionStatus, StatusStore};
use crate::stream::{StreamPublisher, DEFAULT_CAPACITY, DEFAULT_QUALITY};

/// Opens the configured frame source. Runs on a blocking thread.
pub type SourceOpener =
    Arc<dyn Fn() -> Result<Box<dyn FrameSource>, CaptureError> + Send + Sync>;

/// Creates an encoder backend for each pipeline run
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn EncoderBackend> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub detector: DetectorConfig,
    pub recorder: RecorderConfig,
    /// Parts buffered per viewer
    pub stream_capacity: usize,
    pub jpeg_quality: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            recorder: RecorderConfig::default(),
            stream_capacity: DEFAULT_CAPACITY,
            jpeg_quality: DEFAULT_QUALITY,
        }
    }
}

/// Snapshot of the service state
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    pub running: bool,
    pub runs_started: u64,
    pub viewers: usize,
    pub frames_published: u64,
    pub uptime_secs: u64,
    /// Counters of the most recently finished run
    pub last_run: Option<PipelineSummary>,
    /// Why the most recently finished run stopped, if it failed
    pub last_error: Option<String>,
}

struct Running {
    generation: u64,
    publisher: StreamPublisher,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ServiceInner {
    config: ServiceConfig,
    open_source: SourceOpener,
    encoder: EncoderFactory,
    events: EventLog,
    status: StatusStore,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    running: Mutex<Option<Running>>,
    /// Serializes concurrent starts while the device is being opened
    starting: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    last_run: Mutex<(Option<PipelineSummary>, Option<String>)>,
    started_at: Instant,
}

/// Cheap to clone handle to the capture supervisor
#[derive(Clone)]
pub struct CaptureService {
    inner: Arc<ServiceInner>,
}

impl CaptureService {
    pub fn new(
        config: ServiceConfig,
        open_source: SourceOpener,
        encoder: EncoderFactory,
        events: EventLog,
        status: StatusStore,
    ) -> Self {
        Self::with_shutdown(
            config,
            open_source,
            encoder,
            events,
            status,
            CancellationToken::new(),
            TaskTracker::new(),
        )
    }

    /// Runs are cancelled with `shutdown` and tracked by `tracker`
    pub fn with_shutdown(
        config: ServiceConfig,
        open_source: SourceOpener,
        encoder: EncoderFactory,
        events: EventLog,
        status: StatusStore,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                open_source,
                encoder,
                events,
                status,
                shutdown,
                tracker,
                running: Mutex::new(None),
                starting: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                last_run: Mutex::new((None, None)),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Start capturing unless already running. Returns the live publisher.
    pub async fn start(&self) -> Result<StreamPublisher, ServiceError> {
        if let Some(publisher) = self.inner.current_publisher() {
            return Ok(publisher);
        }

        let _starting = self.inner.starting.lock().await;
        if let Some(publisher) = self.inner.current_publisher() {
            return Ok(publisher);
        }

        let opener = Arc::clone(&self.inner.open_source);
        let mut source = tokio::task::spawn_blocking(move || opener())
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))??;

        let controller = match RecordingController::new(
            self.inner.config.recorder.clone(),
            (self.inner.encoder)(),
            self.inner.events.clone(),
            self.inner.status.clone(),
        ) {
            Ok(controller) => controller,
            Err(e) => {
                source.close();
                return Err(e.into());
            }
        };

        let publisher = StreamPublisher::new(self.inner.config.stream_capacity)
            .with_quality(self.inner.config.jpeg_quality);
        let pipeline = Pipeline::new(
            source,
            MotionDetector::new(self.inner.config.detector.clone()),
            controller,
            publisher.clone(),
        );

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let task_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);

        // held across the spawn so a run that ends at once still finds its slot
        let mut slot = self.inner.running.lock();
        let handle = self.inner.tracker.spawn_blocking(move || {
            let outcome = pipeline.run(&task_cancel);
            inner.finished(generation, outcome);
        });
        *slot = Some(Running {
            generation,
            publisher: publisher.clone(),
            cancel,
            handle,
        });
        drop(slot);
        info!(generation, "Capture started");
        Ok(publisher)
    }

    /// Live multipart stream, starting capture if needed
    pub async fn subscribe(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static, ServiceError>
    {
        Ok(self.start().await?.subscribe())
    }

    /// Cancel the running pipeline and wait until the device is released.
    /// Returns the counters of the run that was stopped.
    pub async fn stop(&self) -> Option<PipelineSummary> {
        let running = self.inner.running.lock().take()?;
        running.cancel.cancel();
        drop(running.publisher);
        if let Err(e) = running.handle.await {
            warn!(generation = running.generation, "Capture task failed: {}", e);
        }
        info!(generation = running.generation, "Capture stopped");
        self.inner.last_run.lock().0.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.current_publisher().is_some()
    }

    pub fn status(&self) -> MotionStatus {
        self.inner.status.snapshot()
    }

    pub fn stats(&self) -> ServiceStats {
        let publisher = self.inner.current_publisher();
        let (last_run, last_error) = self.inner.last_run.lock().clone();
        ServiceStats {
            running: publisher.is_some(),
            runs_started: self.inner.generation.load(Ordering::Relaxed),
            viewers: publisher.as_ref().map_or(0, StreamPublisher::viewer_count),
            frames_published: publisher.as_ref().map_or(0, StreamPublisher::published),
            uptime_secs: self.inner.started_at.elapsed().as_secs(),
            last_run,
            last_error,
        }
    }
}

impl ServiceInner {
    fn current_publisher(&self) -> Option<StreamPublisher> {
        self.running
            .lock()
            .as_ref()
            .filter(|running| !running.handle.is_finished())
            .map(|running| running.publisher.clone())
    }

    /// Record the outcome of run `generation` and release its slot, unless a
    /// newer run already owns it.
    fn finished(&self, generation: u64, outcome: RunOutcome) {
        let error = outcome.error.map(|e| {
            warn!(generation, "Capture ended with error: {}", e);
            e.to_string()
        });
        *self.last_run.lock() = (Some(outcome.summary), error);

        let mut slot = self.running.lock();
        match slot.as_ref() {
            Some(running) if running.generation == generation => {
                *slot = None;
                info!(generation, "Capture released");
            }
            Some(running) => debug!(
                current_generation = running.generation,
                stale_generation = generation,
                "Skipping release: newer capture run exists"
            ),
            None => {}
        }
    }
}
