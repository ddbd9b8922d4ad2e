//! Frame annotation: region outlines and the recording indicator

use image::{Rgb, RgbImage};

use super::regions::Rect;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;
pub const RECORDING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const MONITORING_COLOR: Rgb<u8> = Rgb([0, 200, 0]);

const INDICATOR_OFFSET: u32 = 8;
const INDICATOR_SIZE: u32 = 16;

/// Outline `rect` with lines `thickness` pixels wide, drawn inward
pub fn draw_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if rect.width == 0 || rect.height == 0 || rect.x >= w || rect.y >= h {
        return;
    }
    let x0 = rect.x;
    let y0 = rect.y;
    let x1 = (rect.x + rect.width - 1).min(w - 1);
    let y1 = (rect.y + rect.height - 1).min(h - 1);

    for t in 0..thickness {
        let top = y0 + t;
        let bottom = y1.saturating_sub(t);
        let left = x0 + t;
        let right = x1.saturating_sub(t);
        if top > bottom || left > right {
            break;
        }
        for x in left..=right {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        for y in top..=bottom {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}

/// Paint the capture state badge in the top-left corner
pub fn annotate_status(image: &mut RgbImage, recording: bool) {
    let color = if recording {
        RECORDING_COLOR
    } else {
        MONITORING_COLOR
    };
    let (w, h) = image.dimensions();
    let x_end = (INDICATOR_OFFSET + INDICATOR_SIZE).min(w);
    let y_end = (INDICATOR_OFFSET + INDICATOR_SIZE).min(h);
    for y in INDICATOR_OFFSET.min(y_end)..y_end {
        for x in INDICATOR_OFFSET.min(x_end)..x_end {
            image.put_pixel(x, y, color);
        }
    }
}
