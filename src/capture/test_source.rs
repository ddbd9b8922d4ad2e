//! Synthetic frame source for development without a camera

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use tracing::{debug, info};

use super::{CaptureConfig, FrameSource};
use crate::error::CaptureError;
use crate::Frame;

/// Configuration for the synthetic source
#[derive(Debug, Clone)]
pub struct TestSourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Stop with `EndOfStream` after this many frames (None = endless)
    pub frame_count: Option<u64>,
    /// Pace reads at `fps` like a real camera
    pub realtime: bool,
}

impl Default for TestSourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 20,
            frame_count: None,
            realtime: true,
        }
    }
}

type Generator = Box<dyn FnMut(u64) -> RgbImage + Send>;

/// Frame source driven by an image generator closure.
///
/// Timestamps are spaced exactly `1 / fps` apart from the moment the source
/// is created, so durations derived from them are deterministic.
pub struct TestSource {
    config: CaptureConfig,
    generator: Generator,
    frame_count: Option<u64>,
    realtime: bool,
    epoch: DateTime<Local>,
    started: Option<Instant>,
    next: u64,
    closed: bool,
}

impl TestSource {
    /// Create a source producing `generator(n)` as the n-th frame
    pub fn new<G>(config: TestSourceConfig, generator: G) -> Self
    where
        G: FnMut(u64) -> RgbImage + Send + 'static,
    {
        let capture = CaptureConfig {
            width: config.width,
            height: config.height,
            fps: config.fps.max(1),
            input_format: "test".into(),
            ..Default::default()
        };
        info!(
            "Test video source: {}x{} @ {}fps",
            config.width, config.height, config.fps
        );
        Self {
            config: capture,
            generator: Box::new(generator),
            frame_count: config.frame_count,
            realtime: config.realtime,
            epoch: Local::now(),
            started: None,
            next: 0,
            closed: false,
        }
    }

    /// Static dark scene with no motion
    pub fn blank(config: TestSourceConfig) -> Self {
        let (w, h) = (config.width, config.height);
        Self::new(config, move |_| RgbImage::from_pixel(w, h, Rgb([16, 16, 16])))
    }

    /// Dark scene where a bright block crosses the frame for `active` frames
    /// out of every `period` frames.
    pub fn intruder(config: TestSourceConfig, period: u64, active: u64) -> Self {
        let (w, h) = (config.width, config.height);
        let block = (w.min(h) / 8).max(8);
        Self::new(config, move |n| {
            let mut image = RgbImage::from_pixel(w, h, Rgb([16, 16, 16]));
            let phase = n % period.max(1);
            if phase < active {
                let span = w.saturating_sub(block).max(1) as u64;
                let x = ((phase * span) / active.max(1)) as u32;
                let y = h / 2 - block / 2;
                fill_rect(&mut image, x, y, block, block, Rgb([230, 230, 230]));
            }
            image
        })
    }

    /// Time of frame `n` relative to the first frame
    fn offset(&self, n: u64) -> Duration {
        let micros = u128::from(n) * 1_000_000 / u128::from(self.config.fps.max(1));
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    fn timestamp(&self, n: u64) -> DateTime<Local> {
        let offset_us = i64::try_from(self.offset(n).as_micros()).unwrap_or(i64::MAX);
        self.epoch + chrono::Duration::microseconds(offset_us)
    }
}

impl FrameSource for TestSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::EndOfStream);
        }
        if let Some(limit) = self.frame_count {
            if self.next >= limit {
                debug!("Test source exhausted after {} frames", self.next);
                return Err(CaptureError::EndOfStream);
            }
        }

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + self.offset(self.next);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let n = self.next;
        let image = (self.generator)(n);
        self.next += 1;
        Ok(Frame::new(image, self.timestamp(n), n))
    }

    fn close(&mut self) {
        if !self.closed {
            info!("Test source closed after {} frames", self.next);
            self.closed = true;
        }
    }

    fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

/// Fill a rectangle, clipped to the image bounds
pub fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(image.width());
    let y_end = (y + h).min(image.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite(frames: u64) -> TestSourceConfig {
        TestSourceConfig {
            width: 32,
            height: 24,
            fps: 20,
            frame_count: Some(frames),
            realtime: false,
        }
    }

    #[test]
    fn yields_frame_count_then_end_of_stream() {
        let mut source = TestSource::blank(finite(3));
        for expected in 0..3 {
            let frame = source.read().unwrap();
            assert_eq!(frame.sequence, expected);
            assert_eq!((frame.width(), frame.height()), (32, 24));
        }
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn timestamps_are_spaced_by_frame_interval() {
        let mut source = TestSource::blank(finite(21));
        let first = source.read().unwrap().timestamp;
        let mut last = first;
        while let Ok(frame) = source.read() {
            last = frame.timestamp;
        }
        assert_eq!((last - first).num_milliseconds(), 1000);
    }

    #[test]
    fn pacing_offset_survives_long_runs() {
        let source = TestSource::blank(finite(0));
        let n = u64::from(u32::MAX) + 20;
        assert_eq!(source.offset(20), Duration::from_secs(1));
        assert_eq!(source.offset(n), Duration::from_micros(n * 50_000));
    }

    #[test]
    fn close_is_idempotent_and_stops_reads() {
        let mut source = TestSource::blank(TestSourceConfig {
            frame_count: None,
            realtime: false,
            ..finite(0)
        });
        assert!(source.read().is_ok());
        source.close();
        source.close();
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn zero_frames_fails_on_first_read() {
        let mut source = TestSource::blank(finite(0));
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn intruder_block_only_in_active_phase() {
        let mut source = TestSource::intruder(finite(10), 5, 2);
        let bright = |frame: &Frame| frame.image.pixels().any(|p| p.0[0] > 200);

        let frames: Vec<Frame> = (0..10).map(|_| source.read().unwrap()).collect();
        let active: Vec<bool> = frames.iter().map(bright).collect();
        assert_eq!(
            active,
            vec![true, true, false, false, false, true, true, false, false, false]
        );
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut image = RgbImage::new(4, 4);
        fill_rect(&mut image, 2, 2, 10, 10, Rgb([255, 0, 0]));
        let filled = image.pixels().filter(|p| p.0[0] == 255).count();
        assert_eq!(filled, 4);
    }
}
