//! Frame and mask types shared by capture, detection and recording

use chrono::{DateTime, Local};
use image::RgbImage;

/// A single captured video frame.
///
/// Frames are transient: each one is owned by the pipeline iteration that
/// read it and dropped once it has been recorded and published.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Wall-clock capture time
    pub timestamp: DateTime<Local>,
    /// Monotonic frame counter within one capture run
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: DateTime<Local>, sequence: u64) -> Self {
        Self {
            image,
            timestamp,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Value of a foreground pixel in a [`ForegroundMask`]
pub const FOREGROUND: u8 = 255;

/// Binary foreground bitmap, one byte per pixel (0 or [`FOREGROUND`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMask {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ForegroundMask {
    /// All-background mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.pixels[self.index(x, y)] != 0
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        let idx = self.index(x, y);
        self.pixels[idx] = if foreground { FOREGROUND } else { 0 };
    }

    /// Number of foreground pixels
    pub fn count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p != 0).count()
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}
