use serde::Serialize;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build from a center-format box (`cx, cy, w, h`).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Clamp to `[0, width] x [0, height]`.
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// A single detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn report(&self) -> DetectionReport {
        DetectionReport {
            bbox: self.bbox.to_array(),
            class: self.class_id,
            label: self.label.clone(),
            score: self.confidence,
        }
    }
}

/// JSON shape returned by `/detect` and `detect_image`.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionReport {
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub class: usize,
    pub label: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::from_center(10.0, 10.0, 4.0, 4.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::from_center(10.0, 10.0, 4.0, 4.0);
        let b = BoundingBox::from_center(30.0, 30.0, 4.0, 4.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let b = BoundingBox {
            x1: -5.0,
            y1: 3.0,
            x2: 700.0,
            y2: 500.0,
        }
        .clamp(640, 480);
        assert_eq!(b.to_array(), [0.0, 3.0, 640.0, 480.0]);
    }

    #[test]
    fn report_serializes_box_key() -> anyhow::Result<()> {
        let det = Detection {
            class_id: 16,
            label: "dog".to_string(),
            confidence: 0.5,
            bbox: BoundingBox {
                x1: 1.0,
                y1: 2.0,
                x2: 3.0,
                y2: 4.0,
            },
        };
        let json = serde_json::to_value(det.report())?;
        assert_eq!(json["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(json["class"], 16);
        assert_eq!(json["label"], "dog");
        Ok(())
    }
}
