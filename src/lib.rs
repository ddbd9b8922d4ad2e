//! Vigil - motion-triggered camera recorder
//!
//! This crate provides everything needed to run a single-camera motion
//! recorder:
//! - Capture: frame sources (FFmpeg-backed devices, synthetic test frames)
//! - Detect: background subtraction, morphology, region extraction
//! - Recording: one video file per motion episode, with a discard policy
//! - Events and status: the plain-text motion log and the live motion flag
//! - Stream: MJPEG fan-out of annotated frames
//! - Web: axum HTTP surface for preview, status, recordings and logs
//!
//! # Architecture
//!
//! One producer loop owns the camera, the background model and the open
//! recording. It runs on a blocking thread started by [`CaptureService`];
//! everything else reads from it through the [`StatusStore`] watch channel
//! or subscribes to the [`StreamPublisher`] broadcast.
//!
//! # Example
//!
//! ```ignore
//! use vigil::{CaptureService, ServiceConfig, EventLog, StatusStore};
//!
//! let service = CaptureService::new(config, opener, encoder, events, status);
//! let feed = service.subscribe().await?;
//! ```

// Frame and mask types
pub mod frame;

pub mod error;

// Frame sources
pub mod capture;

// Motion detection
pub mod detect;

pub mod events;
pub mod status;

// Motion-triggered recording
pub mod recording;

// Live preview fan-out
pub mod stream;

// Capture loop and its supervisor
pub mod pipeline;
pub mod service;

// HTTP surface
pub mod web;

pub use capture::{CaptureConfig, DeviceSource, FrameSource};
#[cfg(feature = "test-source")]
pub use capture::{TestSource, TestSourceConfig};
pub use detect::{Detection, DetectorConfig, MotionDetector, Rect, Region};
pub use error::{CaptureError, DetectError, RecordingError, ServiceError};
pub use events::{EventLog, MotionEvent};
pub use frame::{ForegroundMask, Frame};
pub use pipeline::{Pipeline, PipelineSummary, RunOutcome};
pub use recording::{
    EncoderBackend, FfmpegEncoderBackend, RecorderConfig, RecordingController, RecordingInfo,
    RecordingLibrary, Transition, VideoEncoder,
};
#[cfg(feature = "test-source")]
pub use recording::RawEncoderBackend;
pub use service::{CaptureService, EncoderFactory, ServiceConfig, ServiceStats, SourceOpener};
pub use status::{MotionStatus, StatusStore};
pub use stream::StreamPublisher;
pub use web::{AccessGate, OpenAccess, TokenGate};
