//! Adaptive per-pixel background model
//!
//! Each pixel keeps a running RGB mean and a single isotropic variance. A
//! pixel is foreground when its squared distance to the mean exceeds
//! `var_threshold * variance`. Shadows are never classified separately, so
//! they only show up as foreground if they exceed the same threshold.

use image::RgbImage;

use crate::frame::{ForegroundMask, FOREGROUND};

/// Variance assigned to every pixel when the model is initialized
pub const VAR_INIT: f32 = 15.0;
/// Lower variance clamp
pub const VAR_MIN: f32 = 4.0;
/// Upper variance clamp
pub const VAR_MAX: f32 = 75.0;

pub struct BackgroundModel {
    width: u32,
    height: u32,
    history: u32,
    var_threshold: f32,
    mean: Vec<[f32; 3]>,
    variance: Vec<f32>,
    frames_seen: u64,
}

impl BackgroundModel {
    /// Model seeded from its first frame
    pub fn new(first: &RgbImage, history: u32, var_threshold: f32) -> Self {
        let mean = first
            .pixels()
            .map(|p| [p.0[0] as f32, p.0[1] as f32, p.0[2] as f32])
            .collect::<Vec<_>>();
        let variance = vec![VAR_INIT; mean.len()];
        Self {
            width: first.width(),
            height: first.height(),
            history: history.max(1),
            var_threshold,
            mean,
            variance,
            frames_seen: 1,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Learning rate for the next update: fast while the model is young,
    /// `1 / history` once it has seen half a history of frames.
    pub fn learning_rate(&self) -> f32 {
        let window = (2 * (self.frames_seen + 1)).min(self.history as u64);
        1.0 / window as f32
    }

    /// Classify `image` against the model, then fold it into the model.
    ///
    /// `image` must have the model's dimensions.
    pub fn apply(&mut self, image: &RgbImage) -> ForegroundMask {
        debug_assert_eq!(image.dimensions(), (self.width, self.height));

        let alpha = self.learning_rate();
        let threshold = self.var_threshold;
        let mut mask = ForegroundMask::new(self.width, self.height);
        let out = mask.as_raw_mut();

        for (i, pixel) in image.pixels().enumerate() {
            let mean = &mut self.mean[i];
            let var = &mut self.variance[i];

            let d = [
                pixel.0[0] as f32 - mean[0],
                pixel.0[1] as f32 - mean[1],
                pixel.0[2] as f32 - mean[2],
            ];
            let dist2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];

            if dist2 > threshold * *var {
                out[i] = FOREGROUND;
            }

            for c in 0..3 {
                mean[c] += alpha * d[c];
            }
            *var = (*var + alpha * (dist2 - *var)).clamp(VAR_MIN, VAR_MAX);
        }

        self.frames_seen += 1;
        mask
    }
}
