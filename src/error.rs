//! Error types for the capture, detection and recording stages

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the frame source. Both variants are fatal to the current
/// pipeline run; capture must be re-opened explicitly.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("capture device stopped producing frames")]
    EndOfStream,

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub(crate) fn unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of the motion detector
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DetectError {
    #[error("invalid frame dimensions {width}x{height} (expected {expected_width}x{expected_height})")]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
}

/// Failures of the video encoder and recording files
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to open encoder for {path:?}: {reason}")]
    EncoderOpen { path: PathBuf, reason: String },

    #[error("failed to write frame: {0}")]
    Write(String),

    #[error("recording I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures starting the capture service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("capture task failed: {0}")]
    Task(String),
}
