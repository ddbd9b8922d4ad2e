//! Motion detection by background subtraction
//!
//! Per frame:
//! 1. classify pixels against the adaptive background model
//! 2. erode once, dilate twice (5×5) to drop speckle noise
//! 3. extract external connected regions
//! 4. regions larger than `min_area` count as motion and get a green box

pub mod background;
pub mod draw;
pub mod morphology;
pub mod regions;

use image::RgbImage;
use tracing::debug;

use crate::error::DetectError;
use crate::frame::ForegroundMask;
use crate::Frame;

use background::BackgroundModel;
pub use draw::annotate_status;
pub use regions::{Rect, Region};

/// Detector parameters
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Frames of history the background model adapts over
    pub history: u32,
    /// Squared-distance threshold, in units of per-pixel variance
    pub var_threshold: f32,
    /// Side of the square structuring element
    pub kernel_size: u32,
    pub erode_iterations: u32,
    pub dilate_iterations: u32,
    /// Regions must be strictly larger than this many pixels
    pub min_area: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history: 100,
            var_threshold: 50.0,
            kernel_size: 5,
            erode_iterations: 1,
            dilate_iterations: 2,
            min_area: 500,
        }
    }
}

/// Result of processing one frame
#[derive(Debug, Clone)]
pub struct Detection {
    /// Copy of the input with qualifying regions outlined
    pub annotated: RgbImage,
    /// Cleaned foreground mask
    pub mask: ForegroundMask,
    /// Regions above the area threshold
    pub regions: Vec<Region>,
    pub motion_detected: bool,
}

/// Stateful motion detector. The background model persists across calls.
pub struct MotionDetector {
    config: DetectorConfig,
    model: Option<BackgroundModel>,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Drop the background model; the next frame seeds a new one
    pub fn reset(&mut self) {
        self.model = None;
    }

    pub fn process(&mut self, frame: &Frame) -> Result<Detection, DetectError> {
        let image = &frame.image;
        let (width, height) = image.dimensions();

        let raw_mask = match &mut self.model {
            Some(model) => {
                let (expected_width, expected_height) = model.dimensions();
                if (width, height) != (expected_width, expected_height) {
                    return Err(DetectError::InvalidDimensions {
                        width,
                        height,
                        expected_width,
                        expected_height,
                    });
                }
                model.apply(image)
            }
            None => {
                if width == 0 || height == 0 {
                    return Err(DetectError::InvalidDimensions {
                        width,
                        height,
                        expected_width: width.max(1),
                        expected_height: height.max(1),
                    });
                }
                self.model = Some(BackgroundModel::new(
                    image,
                    self.config.history,
                    self.config.var_threshold,
                ));
                ForegroundMask::new(width, height)
            }
        };

        let eroded = morphology::erode(
            &raw_mask,
            self.config.kernel_size,
            self.config.erode_iterations,
        );
        let mask = morphology::dilate(
            &eroded,
            self.config.kernel_size,
            self.config.dilate_iterations,
        );

        let regions: Vec<Region> = regions::external_regions(&mask)
            .into_iter()
            .filter(|r| r.area > self.config.min_area)
            .collect();

        let mut annotated = image.clone();
        for region in &regions {
            draw::draw_rect(&mut annotated, region.bounds, draw::BOX_COLOR, draw::BOX_THICKNESS);
        }

        let motion_detected = !regions.is_empty();
        if motion_detected {
            debug!(
                frame = frame.sequence,
                regions = regions.len(),
                largest = regions.iter().map(|r| r.area).max().unwrap_or(0),
                "Motion regions found"
            );
        }

        Ok(Detection {
            annotated,
            mask,
            regions,
            motion_detected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use image::Rgb;

    const W: u32 = 160;
    const H: u32 = 120;

    fn frame(n: u64, block: Option<(u32, u32, u32)>) -> Frame {
        let mut image = RgbImage::from_pixel(W, H, Rgb([20, 20, 20]));
        if let Some((x0, y0, side)) = block {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    image.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
        }
        Frame::new(image, Local::now(), n)
    }

    fn warmed_up() -> MotionDetector {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        for n in 0..10 {
            assert!(!detector.process(&frame(n, None)).unwrap().motion_detected);
        }
        detector
    }

    #[test]
    fn first_frame_never_reports_motion() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        let detection = detector.process(&frame(0, Some((10, 10, 40)))).unwrap();
        assert!(!detection.motion_detected);
        assert_eq!(detection.mask.count(), 0);
    }

    #[test]
    fn large_block_is_motion_with_box() {
        let mut detector = warmed_up();
        let detection = detector.process(&frame(10, Some((40, 40, 30)))).unwrap();

        assert!(detection.motion_detected);
        assert_eq!(detection.regions.len(), 1);
        // 30 px block, eroded to 26, dilated twice to 34
        let region = detection.regions[0];
        assert_eq!(region.bounds, Rect { x: 38, y: 38, width: 34, height: 34 });
        assert_eq!(region.area, 34 * 34);
        assert_eq!(*detection.annotated.get_pixel(38, 38), draw::BOX_COLOR);
    }

    #[test]
    fn small_block_is_not_motion() {
        let mut detector = warmed_up();
        // 12 px block: eroded to 8, dilated to 16 -> 256 px, below 500
        let detection = detector.process(&frame(10, Some((40, 40, 12)))).unwrap();
        assert!(!detection.motion_detected);
        assert!(detection.regions.is_empty());
        assert!(detection.mask.count() > 0);
    }

    #[test]
    fn speckle_noise_is_removed() {
        let mut detector = warmed_up();
        let mut noisy = frame(10, None);
        for i in 0..40 {
            noisy.image.put_pixel((i * 37) % W, (i * 23) % H, Rgb([255, 255, 255]));
        }
        let detection = detector.process(&noisy).unwrap();
        assert_eq!(detection.mask.count(), 0);
        assert!(!detection.motion_detected);
    }

    #[test]
    fn annotated_is_a_copy() {
        let mut detector = warmed_up();
        let input = frame(10, Some((40, 40, 30)));
        let detection = detector.process(&input).unwrap();
        assert_ne!(detection.annotated, input.image);
        assert_eq!(*input.image.get_pixel(38, 38), Rgb([20, 20, 20]));
    }

    #[test]
    fn dimension_change_is_rejected() {
        let mut detector = warmed_up();
        let other = Frame::new(RgbImage::new(80, 60), Local::now(), 11);
        assert_eq!(
            detector.process(&other).unwrap_err(),
            DetectError::InvalidDimensions {
                width: 80,
                height: 60,
                expected_width: W,
                expected_height: H,
            }
        );

        detector.reset();
        assert!(detector.process(&other).is_ok());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        let empty = Frame::new(RgbImage::new(0, 0), Local::now(), 0);
        assert!(matches!(
            detector.process(&empty),
            Err(DetectError::InvalidDimensions { .. })
        ));
    }
}
