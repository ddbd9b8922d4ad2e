//! Motion-triggered recording
//!
//! The controller is a two-state machine driven by edges of the motion
//! signal. A false→true edge opens one encoder, the matching true→false edge
//! closes it, and every frame in between is appended. Clips that end up empty
//! or tiny are deleted as spurious detections.

pub mod encoder;
pub mod library;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RecordingError;
use crate::events::{EventLog, MotionEvent};
use crate::status::StatusStore;

pub use encoder::{EncoderBackend, FfmpegEncoderBackend, VideoEncoder};
#[cfg(feature = "test-source")]
pub use encoder::RawEncoderBackend;
pub use library::{RecordingInfo, RecordingLibrary};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory receiving the clips
    pub output_dir: PathBuf,
    /// Encoder frame rate
    pub fps: u32,
    /// Encoder frame width
    pub width: u32,
    /// Encoder frame height
    pub height: u32,
    /// Container file extension
    pub container: String,
    /// Finished clips smaller than this are deleted
    pub min_file_bytes: u64,
    /// Minimum hold time before a recording may stop. Reported, not applied:
    /// flickering motion still produces back-to-back short clips.
    pub cooldown: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            fps: 20,
            width: 640,
            height: 480,
            container: "mp4".to_string(),
            min_file_bytes: 100 * 1024,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// The single open recording
pub struct RecordingSession {
    pub filename: String,
    pub path: PathBuf,
    pub event: MotionEvent,
    pub frames_written: u64,
    encoder: Box<dyn VideoEncoder>,
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("filename", &self.filename)
            .field("event", &self.event)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

/// Outcome of a closed recording
#[derive(Debug, Clone, Serialize)]
pub struct FinishedRecording {
    pub filename: String,
    pub path: PathBuf,
    pub event: MotionEvent,
    pub frames_written: u64,
    pub size_bytes: u64,
    /// False if the file was deleted by the discard policy
    pub kept: bool,
}

/// What a motion observation did to the controller
#[derive(Debug)]
pub enum Transition {
    /// No edge, or an edge with nothing to do
    None,
    /// Idle → Recording
    Started { filename: String, at: DateTime<Local> },
    /// Motion started but the encoder could not be opened; still Idle
    StartFailed(RecordingError),
    /// Recording → Idle
    Stopped(FinishedRecording),
}

enum State {
    Idle,
    Recording(RecordingSession),
}

/// Record/idle state machine owning the encoder lifecycle
pub struct RecordingController {
    config: RecorderConfig,
    backend: Box<dyn EncoderBackend>,
    events: EventLog,
    status: StatusStore,
    state: State,
    /// Motion signal seen on the previous observation
    motion_active: bool,
}

impl RecordingController {
    pub fn new(
        config: RecorderConfig,
        backend: Box<dyn EncoderBackend>,
        events: EventLog,
        status: StatusStore,
    ) -> Result<Self, RecordingError> {
        fs::create_dir_all(&config.output_dir)?;
        debug!(
            cooldown_secs = config.cooldown.as_secs_f64(),
            "Recording cooldown is configured but not applied"
        );
        Ok(Self {
            config,
            backend,
            events,
            status,
            state: State::Idle,
            motion_active: false,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording(_))
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        match &self.state {
            State::Recording(session) => Some(session),
            State::Idle => None,
        }
    }

    /// Feed the motion signal of the frame captured at `at`
    pub fn observe(&mut self, motion: bool, at: DateTime<Local>) -> Transition {
        match (self.motion_active, motion) {
            (false, true) => {
                self.motion_active = true;
                self.start(at)
            }
            (true, false) => {
                self.motion_active = false;
                self.stop(at)
            }
            _ => Transition::None,
        }
    }

    /// Append a processed frame if a recording is open. Returns whether the
    /// frame was written.
    pub fn record(&mut self, image: &RgbImage) -> bool {
        let State::Recording(session) = &mut self.state else {
            return false;
        };
        match session.encoder.write_frame(image) {
            Ok(()) => {
                session.frames_written += 1;
                true
            }
            Err(e) => {
                warn!(filename = %session.filename, "Frame write failed: {}", e);
                false
            }
        }
    }

    /// Close any open recording as if motion had ended at `at`
    pub fn shutdown(&mut self, at: DateTime<Local>) -> Option<FinishedRecording> {
        self.motion_active = false;
        match self.stop(at) {
            Transition::Stopped(finished) => Some(finished),
            _ => None,
        }
    }

    fn start(&mut self, at: DateTime<Local>) -> Transition {
        if self.is_recording() {
            return Transition::None;
        }

        let filename = unique_filename(&self.config.output_dir, at, &self.config.container);
        let path = self.config.output_dir.join(&filename);

        let encoder = match self.backend.open(
            &path,
            self.config.fps,
            self.config.width,
            self.config.height,
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!(filename = %filename, "Recording not started: {}", e);
                return Transition::StartFailed(e);
            }
        };

        let event = MotionEvent::begin(at);
        self.events.record_start(&event);
        self.status.motion_started(at);
        info!(filename = %filename, "Recording started");

        self.state = State::Recording(RecordingSession {
            filename: filename.clone(),
            path,
            event,
            frames_written: 0,
            encoder,
        });
        Transition::Started { filename, at }
    }

    fn stop(&mut self, at: DateTime<Local>) -> Transition {
        let State::Recording(session) = std::mem::replace(&mut self.state, State::Idle) else {
            return Transition::None;
        };
        let RecordingSession {
            filename,
            path,
            event,
            frames_written,
            encoder,
        } = session;

        if let Err(e) = encoder.finish() {
            warn!(filename = %filename, "Encoder did not close cleanly: {}", e);
        }

        let event = event.finish(at);
        self.events.record_end(&event);
        self.status.motion_ended();

        let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let kept = frames_written > 0 && size_bytes >= self.config.min_file_bytes;
        if kept {
            info!(
                filename = %filename,
                frames = frames_written,
                bytes = size_bytes,
                duration_secs = event.duration_secs(),
                "Recording saved"
            );
        } else {
            discard(&path);
            info!(
                filename = %filename,
                frames = frames_written,
                bytes = size_bytes,
                "Discarded empty recording"
            );
        }

        Transition::Stopped(FinishedRecording {
            filename,
            path,
            event,
            frames_written,
            size_bytes,
            kept,
        })
    }
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = ?path, "Recording file never created");
        }
        Err(e) => warn!(path = ?path, "Failed to delete recording: {}", e),
    }
}

/// `motion_<YYYYMMDD>_<HHMMSS>.<ext>`, suffixed `_<n>` if already taken
pub fn recording_filename(at: DateTime<Local>, container: &str) -> String {
    format!("motion_{}.{}", at.format("%Y%m%d_%H%M%S"), container)
}

fn unique_filename(dir: &Path, at: DateTime<Local>, container: &str) -> String {
    let base = recording_filename(at, container);
    if !dir.join(&base).exists() {
        return base;
    }
    let stem = format!("motion_{}", at.format("%Y%m%d_%H%M%S"));
    (1u32..)
        .map(|n| format!("{}_{}.{}", stem, n, container))
        .find(|name| !dir.join(name).exists())
        .unwrap_or(base)
}
