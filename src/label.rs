//! Timestamp Labels
//!
//! Burns a short text label into the top-left corner of a frame: white glyphs
//! from a 5x7 bitmap font on a solid grey box.

use crate::models::FrameTimestamp;
use image::{Rgb, RgbImage};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const SCALE: u32 = 3;
const BOX_ORIGIN: u32 = 5;
const PADDING: u32 = 5;

const BOX_COLOR: Rgb<u8> = Rgb([100, 100, 100]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Row bitmaps, most significant of the low five bits is the leftmost column.
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
        's' => [0x00, 0x00, 0x0E, 0x10, 0x0E, 0x01, 0x1E],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'c' => [0x00, 0x00, 0x0E, 0x10, 0x10, 0x11, 0x0E],
        _ => [0; 7],
    }
}

/// Label text for a frame, e.g. `"12 sec"`.
pub fn timestamp_label(timestamp: FrameTimestamp) -> String {
    format!("{} sec", timestamp.whole_seconds())
}

/// Size in pixels of the background box drawn for `text`.
pub fn label_box_size(text: &str) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let text_width = if chars == 0 {
        0
    } else {
        chars * (GLYPH_WIDTH + 1) * SCALE - SCALE
    };
    (text_width + 2 * PADDING, GLYPH_HEIGHT * SCALE + 2 * PADDING)
}

/// Draws `text` onto `img`. Anything falling outside the image is clipped.
pub fn burn_label(img: &mut RgbImage, text: &str) {
    let (box_w, box_h) = label_box_size(text);
    fill_rect(img, BOX_ORIGIN, BOX_ORIGIN, box_w, box_h, BOX_COLOR);

    let mut pen_x = BOX_ORIGIN + PADDING;
    let pen_y = BOX_ORIGIN + PADDING;
    for c in text.chars() {
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) != 0 {
                    fill_rect(
                        img,
                        pen_x + col * SCALE,
                        pen_y + row as u32 * SCALE,
                        SCALE,
                        SCALE,
                        TEXT_COLOR,
                    );
                }
            }
        }
        pen_x += (GLYPH_WIDTH + 1) * SCALE;
    }
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}
