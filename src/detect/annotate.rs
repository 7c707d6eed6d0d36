//! Draws detection boxes and captions into RGB frames.

use crate::detect::font::{glyph, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::detect::result::Detection;
use crate::frame::{Frame, CHANNELS};

const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [0, 194, 255],
    [132, 56, 255],
];

/// Box color for a class.
pub fn class_color(class_id: usize) -> [u8; 3] {
    PALETTE[class_id % PALETTE.len()]
}

/// Caption rendered above each box, e.g. `DOG 87%`.
pub fn caption(detection: &Detection) -> String {
    format!(
        "{} {:.0}%",
        detection.label.to_uppercase(),
        (detection.confidence * 100.0).clamp(0.0, 100.0)
    )
}

/// Render every detection onto the frame in place.
pub fn annotate(frame: &mut Frame, detections: &[Detection]) {
    if frame.is_empty() {
        return;
    }
    let scale = (frame.width as i32 / 320).max(1);
    let mut canvas = Canvas::new(frame);
    for detection in detections {
        let bbox = detection.bbox.clamp(canvas.width as u32, canvas.height as u32);
        let color = class_color(detection.class_id);
        let (left, top) = (bbox.x1.round() as i32, bbox.y1.round() as i32);
        let (right, bottom) = (bbox.x2.round() as i32 - 1, bbox.y2.round() as i32 - 1);
        canvas.outline(left, top, right, bottom, BOX_THICKNESS, color);

        let text = caption(detection);
        let text_w = text.chars().count() as i32 * GLYPH_ADVANCE * scale + scale;
        let text_h = (GLYPH_HEIGHT + 2) * scale;
        // Captions sit above the box, or inside it when the box touches the top edge.
        let label_y = if top >= text_h { top - text_h } else { top };
        canvas.fill(left, label_y, left + text_w - 1, label_y + text_h - 1, color);
        canvas.text(left + scale, label_y + scale, &text, scale, TEXT_COLOR);
    }
}

struct Canvas<'a> {
    pixels: &'a mut [u8],
    width: i32,
    height: i32,
}

impl<'a> Canvas<'a> {
    fn new(frame: &'a mut Frame) -> Self {
        let (width, height) = (frame.width as i32, frame.height as i32);
        Self {
            pixels: frame.pixels_mut(),
            width,
            height,
        }
    }

    fn put(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.pixels[offset..offset + CHANNELS].copy_from_slice(&color);
    }

    fn fill(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
        let (left, right) = (left.max(0), right.min(self.width - 1));
        let (top, bottom) = (top.max(0), bottom.min(self.height - 1));
        for y in top..=bottom {
            for x in left..=right {
                self.put(x, y, color);
            }
        }
    }

    fn outline(
        &mut self,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        thickness: i32,
        color: [u8; 3],
    ) {
        if right < left || bottom < top {
            return;
        }
        for t in 0..thickness {
            self.fill(left, top + t, right, top + t, color);
            self.fill(left, bottom - t, right, bottom - t, color);
            self.fill(left + t, top, left + t, bottom, color);
            self.fill(right - t, top, right - t, bottom, color);
        }
    }

    fn text(&mut self, mut x: i32, y: i32, text: &str, scale: i32, color: [u8; 3]) {
        for ch in text.chars() {
            for (row, bits) in glyph(ch).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x + col * scale;
                        let py = y + row as i32 * scale;
                        self.fill(px, py, px + scale - 1, py + scale - 1, color);
                    }
                }
            }
            x += GLYPH_ADVANCE * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y * frame.width + x) as usize) * CHANNELS;
        let px = &frame.pixels()[offset..offset + CHANNELS];
        [px[0], px[1], px[2]]
    }

    fn detection(bbox: BoundingBox) -> Detection {
        Detection {
            class_id: 0,
            label: "person".to_string(),
            confidence: 0.874,
            bbox,
        }
    }

    #[test]
    fn caption_formats_percent() {
        let det = detection(BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        });
        assert_eq!(caption(&det), "PERSON 87%");
    }

    #[test]
    fn box_edges_are_drawn_and_interior_untouched() -> anyhow::Result<()> {
        let mut frame = Frame::solid(200, 120, [0, 0, 0])?;
        let det = detection(BoundingBox {
            x1: 50.0,
            y1: 40.0,
            x2: 150.0,
            y2: 100.0,
        });
        annotate(&mut frame, &[det]);

        let color = class_color(0);
        assert_eq!(pixel(&frame, 50, 70), color);
        assert_eq!(pixel(&frame, 149, 70), color);
        assert_eq!(pixel(&frame, 100, 99), color);
        assert_eq!(pixel(&frame, 100, 70), [0, 0, 0]);
        // Caption background sits above the top edge.
        assert_eq!(pixel(&frame, 50, 35), color);
        Ok(())
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() -> anyhow::Result<()> {
        let mut frame = Frame::solid(64, 48, [9, 9, 9])?;
        let det = detection(BoundingBox {
            x1: -40.0,
            y1: -40.0,
            x2: 400.0,
            y2: 400.0,
        });
        annotate(&mut frame, &[det]);
        assert_eq!(pixel(&frame, 63, 47), class_color(0));
        assert_eq!(frame.pixels().len(), 64 * 48 * 3);
        Ok(())
    }
}
