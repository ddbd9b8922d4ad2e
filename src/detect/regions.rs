//! External connected-region extraction from a foreground mask
//!
//! Background reachable from the image border (4-connectivity) is "outside".
//! Everything else is foreground or enclosed by it, and each 8-connected
//! component of that set is one external region with its holes filled. A
//! blob sitting inside another region's hole is therefore part of the outer
//! region rather than a region of its own.

use serde::Serialize;

use crate::frame::ForegroundMask;

/// Axis-aligned bounding rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One external foreground region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub bounds: Rect,
    /// Pixels enclosed by the region's outer boundary
    pub area: u32,
}

/// Find all external regions of `mask`, in scan order of their top-left pixel
pub fn external_regions(mask: &ForegroundMask) -> Vec<Region> {
    let w = mask.width() as usize;
    let h = mask.height() as usize;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let outside = outside_background(mask);
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut regions = Vec::new();

    for start in 0..w * h {
        if outside[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);
        let mut area = 0u32;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !outside[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(Region {
            bounds: Rect {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
            area,
        });
    }

    regions
}

/// Flood-fill background from the border with 4-connectivity
fn outside_background(mask: &ForegroundMask) -> Vec<bool> {
    let w = mask.width() as usize;
    let h = mask.height() as usize;
    let fg = mask.as_raw();
    let mut outside = vec![false; w * h];
    let mut stack = Vec::new();

    let seed = |idx: usize, outside: &mut [bool], stack: &mut Vec<usize>| {
        if fg[idx] == 0 && !outside[idx] {
            outside[idx] = true;
            stack.push(idx);
        }
    };

    for x in 0..w {
        seed(x, &mut outside, &mut stack);
        seed((h - 1) * w + x, &mut outside, &mut stack);
    }
    for y in 0..h {
        seed(y * w, &mut outside, &mut stack);
        seed(y * w + w - 1, &mut outside, &mut stack);
    }

    while let Some(idx) = stack.pop() {
        let (x, y) = (idx % w, idx / w);
        if x > 0 {
            seed(idx - 1, &mut outside, &mut stack);
        }
        if x + 1 < w {
            seed(idx + 1, &mut outside, &mut stack);
        }
        if y > 0 {
            seed(idx - w, &mut outside, &mut stack);
        }
        if y + 1 < h {
            seed(idx + w, &mut outside, &mut stack);
        }
    }

    outside
}
