//! Timestamp overlay burned into every processed frame.
//!
//! Uses a built-in 5x7 bitmap font covering digits, '-', ':' and space, which
//! is all a `%Y-%m-%d %H:%M:%S` stamp needs.

use chrono::{DateTime, Local};
use image::Rgb;

use crate::frame::Frame;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SCALE: u32 = 2;
const MARGIN_X: u32 = 10;
const MARGIN_BOTTOM: u32 = 20;
const INK: Rgb<u8> = Rgb([0, 255, 0]);

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => [0x00; 7],
    }
}

/// Draw `text` with its baseline `MARGIN_BOTTOM` pixels above the bottom-left
/// corner. Pixels falling outside the frame are dropped.
pub fn draw_text(frame: &mut Frame, text: &str) {
    let advance = (GLYPH_W + 1) * SCALE;
    let top = frame
        .height()
        .saturating_sub(MARGIN_BOTTOM + GLYPH_H * SCALE);
    let (width, height) = (frame.width(), frame.height());
    let image = frame.image_mut();

    for (i, c) in text.chars().enumerate() {
        let origin_x = MARGIN_X + i as u32 * advance;
        if origin_x >= width {
            break;
        }
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..SCALE {
                    for dx in 0..SCALE {
                        let x = origin_x + col * SCALE + dx;
                        let y = top + row as u32 * SCALE + dy;
                        if x < width && y < height {
                            image.put_pixel(x, y, INK);
                        }
                    }
                }
            }
        }
    }
}

pub fn stamp(frame: &mut Frame, at: DateTime<Local>) {
    draw_text(frame, &at.format(TIMESTAMP_FORMAT).to_string());
}
