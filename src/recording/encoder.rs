//! Video encoders for motion recordings
//!
//! The default backend pipes raw rgb24 frames into an FFmpeg subprocess that
//! produces H.264 (yuv420p) in an MP4 container, which plays in every browser.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::error::RecordingError;

/// An open video file accepting frames
pub trait VideoEncoder: Send {
    /// Append one frame. Frames of a different size are scaled to the
    /// encoder's size.
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), RecordingError>;

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

/// Opens encoders for new recordings
pub trait EncoderBackend: Send {
    fn open(
        &mut self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError>;
}

/// How long a freshly spawned FFmpeg must stay alive to count as open
const STARTUP_GRACE: Duration = Duration::from_millis(50);

/// FFmpeg subprocess encoder backend
#[derive(Debug, Clone)]
pub struct FfmpegEncoderBackend {
    ffmpeg_path: PathBuf,
    codec: String,
    startup_grace: Duration,
    /// Set once `ffmpeg -encoders` has listed the codec
    codec_available: bool,
}

impl Default for FfmpegEncoderBackend {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegEncoderBackend {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            codec: "libx264".to_string(),
            startup_grace: STARTUP_GRACE,
            codec_available: false,
        }
    }

    /// Use a different FFmpeg video codec
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self.codec_available = false;
        self
    }

    /// How long FFmpeg must survive startup before `open` succeeds
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Ask FFmpeg whether it was built with the configured codec
    fn check_codec(&mut self, path: &Path) -> Result<(), RecordingError> {
        if self.codec_available {
            return Ok(());
        }
        let open_error = |reason: String| RecordingError::EncoderOpen {
            path: path.to_path_buf(),
            reason,
        };

        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| open_error(format!("failed to spawn ffmpeg: {}", e)))?;
        if !output.status.success() {
            return Err(open_error(format!(
                "ffmpeg -encoders exited with {}",
                output.status
            )));
        }
        if !lists_encoder(&String::from_utf8_lossy(&output.stdout), &self.codec) {
            return Err(open_error(format!("ffmpeg has no {} encoder", self.codec)));
        }

        debug!(codec = %self.codec, "ffmpeg encoder available");
        self.codec_available = true;
        Ok(())
    }

    fn args(&self, path: &Path, fps: u32, width: u32, height: u32) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", width, height),
            "-r".into(),
            fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            self.codec.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
            path.to_string_lossy().into_owned(),
        ]
    }
}

impl EncoderBackend for FfmpegEncoderBackend {
    fn open(
        &mut self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError> {
        self.check_codec(path)?;

        // ffmpeg only reports an unwritable output after the first frame
        File::create(path).map_err(|e| RecordingError::EncoderOpen {
            path: path.to_path_buf(),
            reason: format!("output not writable: {}", e),
        })?;

        let args = self.args(path, fps, width, height);
        debug!("ffmpeg encoder args: {:?}", args);

        match spawn_encoder(&self.ffmpeg_path, &args, self.startup_grace) {
            Ok((child, stdin)) => {
                info!(path = ?path, "FFmpeg encoder started: {}x{} @ {}fps", width, height, fps);
                Ok(Box::new(FfmpegEncoder {
                    child: Some(child),
                    stdin: Some(BufWriter::new(stdin)),
                    width,
                    height,
                }))
            }
            Err(reason) => {
                let _ = fs::remove_file(path);
                Err(RecordingError::EncoderOpen {
                    path: path.to_path_buf(),
                    reason,
                })
            }
        }
    }
}

/// Spawn the encoder and wait out `grace`. A process that exits within the
/// grace period never accepted a frame and counts as a failed open.
fn spawn_encoder(
    ffmpeg_path: &Path,
    args: &[String],
    grace: Duration,
) -> Result<(Child, ChildStdin), String> {
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn ffmpeg: {}", e))?;

    let Some(stdin) = child.stdin.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err("ffmpeg stdin not captured".into());
    };

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Err(format!("ffmpeg exited during startup with {}", status)),
            Ok(None) if Instant::now() >= deadline => return Ok((child, stdin)),
            Ok(None) => thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("failed to poll ffmpeg: {}", e));
            }
        }
    }
}

/// Whether `ffmpeg -encoders` output lists `codec`
fn lists_encoder(listing: &str, codec: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == codec)
}

struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    width: u32,
    height: u32,
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), RecordingError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RecordingError::Write("encoder already closed".into()))?;
        let scaled = fit(image, self.width, self.height);
        stdin
            .write_all(scaled.as_ref().unwrap_or(image).as_raw())
            .map_err(|e| RecordingError::Write(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| RecordingError::Write(e.to_string()))?;
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(RecordingError::Write(format!("ffmpeg exited with {}", status)))
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            warn!("Encoder dropped without finish, killing ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Scaled copy of `image` if it does not already match `width`×`height`
fn fit(image: &RgbImage, width: u32, height: u32) -> Option<RgbImage> {
    if image.dimensions() == (width, height) {
        None
    } else {
        Some(imageops::resize(image, width, height, FilterType::Triangle))
    }
}

/// Backend writing uncompressed rgb24 frames straight to the file.
///
/// Useful for development and tests on machines without FFmpeg.
#[cfg(feature = "test-source")]
#[derive(Debug, Clone, Default)]
pub struct RawEncoderBackend;

#[cfg(feature = "test-source")]
impl EncoderBackend for RawEncoderBackend {
    fn open(
        &mut self,
        path: &Path,
        _fps: u32,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError> {
        let file = File::create(path).map_err(|e| RecordingError::EncoderOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(RawEncoder {
            file: BufWriter::new(file),
            width,
            height,
        }))
    }
}

#[cfg(feature = "test-source")]
struct RawEncoder {
    file: BufWriter<File>,
    width: u32,
    height: u32,
}

#[cfg(feature = "test-source")]
impl VideoEncoder for RawEncoder {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), RecordingError> {
        let scaled = fit(image, self.width, self.height);
        self.file
            .write_all(scaled.as_ref().unwrap_or(image).as_raw())
            .map_err(|e| RecordingError::Write(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn ffmpeg_args_target_h264_mp4() {
        let backend = FfmpegEncoderBackend::default();
        let args = backend.args(Path::new("/tmp/motion_20240501_140312.mp4"), 20, 640, 480);
        let joined = args.join(" ");

        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 20 -i pipe:0"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert!(joined.ends_with("/tmp/motion_20240501_140312.mp4"));
    }

    #[test]
    fn custom_codec_is_used() {
        let backend = FfmpegEncoderBackend::new("ffmpeg").with_codec("mpeg4");
        let args = backend.args(Path::new("out.mp4"), 20, 640, 480);
        assert!(args.join(" ").contains("-c:v mpeg4"));
    }

    #[test]
    fn missing_ffmpeg_is_encoder_open_failure() {
        let mut backend = FfmpegEncoderBackend::new("/nonexistent/vigil-ffmpeg");
        let err = backend
            .open(Path::new("out.mp4"), 20, 640, 480)
            .err()
            .expect("open should fail");
        assert!(matches!(err, RecordingError::EncoderOpen { .. }));
    }

    #[test]
    fn encoder_listing_is_matched_by_name() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264 / AVC\n V....D libx264rgb           libx264 H.264 RGB\n";
        assert!(lists_encoder(listing, "libx264"));
        assert!(lists_encoder(listing, "libx264rgb"));
        assert!(!lists_encoder(listing, "libx265"));
        assert!(!lists_encoder(listing, "H.264"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_ffmpeg_is_encoder_open_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("motion_20240501_140312.mp4");
        let mut backend = FfmpegEncoderBackend::new("/bin/false");

        let err = backend.open(&path, 20, 640, 480).err().expect("open should fail");
        assert!(matches!(err, RecordingError::EncoderOpen { .. }));
        assert!(!path.exists());
    }

    /// Fake ffmpeg that lists `libx264` and otherwise exits at once
    #[cfg(unix)]
    fn short_lived_ffmpeg(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffmpeg");
        fs::write(
            &script,
            "#!/bin/sh\ncase \"$*\" in *-encoders*) echo ' V....D libx264 H.264';; esac\nexit 0\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn ffmpeg_exiting_at_startup_is_encoder_open_failure() {
        let dir = tempdir().unwrap();
        let ffmpeg = short_lived_ffmpeg(dir.path());
        let path = dir.path().join("clip.mp4");
        let mut backend = FfmpegEncoderBackend::new(ffmpeg).with_startup_grace(Duration::from_secs(5));

        let err = backend.open(&path, 20, 64, 48).err().expect("open should fail");
        match err {
            RecordingError::EncoderOpen { reason, .. } => assert!(reason.contains("startup")),
            other => panic!("expected EncoderOpen, got {other:?}"),
        }
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_codec_is_encoder_open_failure() {
        let dir = tempdir().unwrap();
        let ffmpeg = short_lived_ffmpeg(dir.path());
        let mut backend = FfmpegEncoderBackend::new(ffmpeg).with_codec("libx265");

        let err = backend
            .open(&dir.path().join("clip.mp4"), 20, 64, 48)
            .err()
            .expect("open should fail");
        match err {
            RecordingError::EncoderOpen { reason, .. } => assert!(reason.contains("libx265")),
            other => panic!("expected EncoderOpen, got {other:?}"),
        }
    }

    #[test]
    fn unwritable_output_is_encoder_open_failure() {
        let dir = tempdir().unwrap();
        let mut backend = FfmpegEncoderBackend::new("ffmpeg");
        backend.codec_available = true;

        let err = backend
            .open(&dir.path().join("missing/clip.mp4"), 20, 64, 48)
            .err()
            .expect("open should fail");
        assert!(matches!(err, RecordingError::EncoderOpen { .. }));
    }

    #[test]
    fn fit_only_resizes_mismatched_frames() {
        let exact = RgbImage::new(64, 48);
        assert!(fit(&exact, 64, 48).is_none());

        let small = RgbImage::from_pixel(32, 24, Rgb([9, 9, 9]));
        let scaled = fit(&small, 64, 48).unwrap();
        assert_eq!(scaled.dimensions(), (64, 48));
    }

    #[cfg(feature = "test-source")]
    #[test]
    fn raw_backend_writes_scaled_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.raw");
        let mut backend = RawEncoderBackend;

        let mut encoder = backend.open(&path, 20, 8, 6).unwrap();
        encoder.write_frame(&RgbImage::new(8, 6)).unwrap();
        encoder.write_frame(&RgbImage::new(4, 3)).unwrap();
        encoder.finish().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 8 * 6 * 3);
    }
}
