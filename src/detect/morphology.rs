//! Binary erosion and dilation with a square structuring element
//!
//! A k×k square is separable, so each pass runs as a horizontal then a
//! vertical 1-D window. Neighbors outside the image are ignored, which keeps
//! border pixels from being eroded just for touching the edge.

use crate::frame::{ForegroundMask, FOREGROUND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Erode,
    Dilate,
}

/// Erode `mask` with a `kernel`×`kernel` square, `iterations` times
pub fn erode(mask: &ForegroundMask, kernel: u32, iterations: u32) -> ForegroundMask {
    repeat(mask, kernel, iterations, Op::Erode)
}

/// Dilate `mask` with a `kernel`×`kernel` square, `iterations` times
pub fn dilate(mask: &ForegroundMask, kernel: u32, iterations: u32) -> ForegroundMask {
    repeat(mask, kernel, iterations, Op::Dilate)
}

fn repeat(mask: &ForegroundMask, kernel: u32, iterations: u32, op: Op) -> ForegroundMask {
    let radius = (kernel / 2) as usize;
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = apply(&current, radius, op);
    }
    current
}

fn apply(mask: &ForegroundMask, radius: usize, op: Op) -> ForegroundMask {
    let w = mask.width() as usize;
    let h = mask.height() as usize;
    let mut tmp = vec![0u8; w * h];
    let mut out = ForegroundMask::new(mask.width(), mask.height());

    let src = mask.as_raw();
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            tmp[y * w + x] = window(row[lo..=hi].iter().copied(), op);
        }
    }

    let dst = out.as_raw_mut();
    for x in 0..w {
        for y in 0..h {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(h - 1);
            dst[y * w + x] = window((lo..=hi).map(|yy| tmp[yy * w + x]), op);
        }
    }

    out
}

#[inline]
fn window(mut values: impl Iterator<Item = u8>, op: Op) -> u8 {
    let hit = match op {
        Op::Erode => values.all(|v| v != 0),
        Op::Dilate => values.any(|v| v != 0),
    };
    if hit {
        FOREGROUND
    } else {
        0
    }
}
