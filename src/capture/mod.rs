//! Capture module: frame sources for the motion pipeline
//!
//! - Device capture via an FFmpeg subprocess (V4L2 webcams by default)
//! - Synthetic frames for development and tests (`test-source` feature)

pub mod device;
#[cfg(feature = "test-source")]
pub mod test_source;

use std::path::PathBuf;

use crate::error::CaptureError;
use crate::Frame;

pub use device::DeviceSource;
#[cfg(feature = "test-source")]
pub use test_source::{TestSource, TestSourceConfig};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera index (`/dev/video<N>` with V4L2)
    pub device_index: u32,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// FFmpeg input format (`v4l2`, `avfoundation`, `dshow`)
    pub input_format: String,
    /// FFmpeg executable
    pub ffmpeg_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 20,
            input_format: default_input_format().to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl CaptureConfig {
    /// Device name as understood by the configured FFmpeg input format
    pub fn device_name(&self) -> String {
        match self.input_format.as_str() {
            "v4l2" => format!("/dev/video{}", self.device_index),
            "dshow" => format!("video={}", self.device_index),
            _ => self.device_index.to_string(),
        }
    }

    /// Size of one rgb24 frame in bytes
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

fn default_input_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "v4l2"
    }
}

/// A source of raw frames. Implementations block in `read` until the next
/// frame is available.
pub trait FrameSource: Send {
    /// Read the next frame. `CaptureError::EndOfStream` means the source is
    /// exhausted and must not be polled again.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    /// Capture settings this source was opened with
    fn config(&self) -> &CaptureConfig;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn config(&self) -> &CaptureConfig {
        (**self).config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_recorder_geometry() {
        let config = CaptureConfig::default();
        assert_eq!((config.width, config.height, config.fps), (640, 480, 20));
        assert_eq!(config.frame_len(), 640 * 480 * 3);
    }

    #[test]
    fn device_name_per_input_format() {
        let mut config = CaptureConfig {
            device_index: 2,
            input_format: "v4l2".into(),
            ..Default::default()
        };
        assert_eq!(config.device_name(), "/dev/video2");

        config.input_format = "avfoundation".into();
        assert_eq!(config.device_name(), "2");

        config.input_format = "dshow".into();
        assert_eq!(config.device_name(), "video=2");
    }
}
