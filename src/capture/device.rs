//! Camera capture through an FFmpeg subprocess
//!
//! FFmpeg reads the platform capture device and writes raw rgb24 frames of
//! exactly `width * height * 3` bytes to stdout, which are read back here.

use std::io::{BufReader, ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use chrono::Local;
use image::RgbImage;
use tracing::{debug, info, warn};

use super::{CaptureConfig, FrameSource};
use crate::error::CaptureError;
use crate::Frame;

/// Handle to an open capture device
pub struct DeviceSource {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    config: CaptureConfig,
    /// First frame, read during `open` to prove the device works
    pending: Option<Frame>,
    sequence: u64,
}

impl DeviceSource {
    /// Open the capture device at a fixed resolution and frame rate.
    ///
    /// Fails with `DeviceUnavailable` if FFmpeg cannot be started or the
    /// device does not deliver a first frame.
    pub fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        let device = config.device_name();
        let args = ffmpeg_args(&config);

        info!(
            device = %device,
            "Opening capture device: {}x{} @ {}fps",
            config.width, config.height, config.fps
        );
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::unavailable(&device, format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::unavailable(&device, "ffmpeg stdout not captured"));
            }
        };

        let mut source = Self {
            child: Some(child),
            stdout: Some(BufReader::with_capacity(config.frame_len(), stdout)),
            config,
            pending: None,
            sequence: 0,
        };

        match source.read_raw() {
            Ok(frame) => {
                source.pending = Some(frame);
                info!(device = %device, "Capture device opened");
                Ok(source)
            }
            Err(e) => {
                source.close();
                Err(CaptureError::unavailable(device, format!("no frames received ({})", e)))
            }
        }
    }

    fn read_raw(&mut self) -> Result<Frame, CaptureError> {
        let frame_len = self.config.frame_len();
        let reader = self.stdout.as_mut().ok_or(CaptureError::EndOfStream)?;

        let mut buf = vec![0u8; frame_len];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(CaptureError::EndOfStream),
            Err(e) => return Err(CaptureError::Io(e)),
        }

        let image = RgbImage::from_raw(self.config.width, self.config.height, buf)
            .ok_or(CaptureError::EndOfStream)?;
        let frame = Frame::new(image, Local::now(), self.sequence);
        self.sequence += 1;
        Ok(frame)
    }
}

impl FrameSource for DeviceSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_raw()
    }

    fn close(&mut self) {
        self.stdout = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            info!(device = %self.config.device_name(), "Releasing capture device");
            if let Err(e) = child.kill() {
                debug!("ffmpeg already exited: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap ffmpeg capture process: {}", e);
            }
        }
    }

    fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn ffmpeg_args(config: &CaptureConfig) -> Vec<String> {
    let size = format!("{}x{}", config.width, config.height);
    let fps = config.fps.to_string();
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        config.input_format.clone(),
        "-framerate".into(),
        fps.clone(),
        "-video_size".into(),
        size,
        "-i".into(),
        config.device_name(),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-r".into(),
        fps,
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "pipe:1".into(),
    ]
}
