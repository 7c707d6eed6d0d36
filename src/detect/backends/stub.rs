use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::{class_id_for, label_for};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const STUB_CONFIDENCE: f32 = 0.90;

/// Stub backend for running without a model.
///
/// `stub://` detects nothing; `stub://<label>` reports one centered object of that
/// COCO class covering the middle half of every frame.
pub struct StubBackend {
    class_id: Option<usize>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { class_id: None }
    }

    pub fn with_class(class_id: usize) -> Self {
        Self {
            class_id: Some(class_id),
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let label = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("stub backend requires a stub:// model path, got '{}'", uri))?;
        if label.is_empty() {
            return Ok(Self::new());
        }
        class_id_for(label)
            .map(Self::with_class)
            .ok_or_else(|| anyhow!("unknown COCO label '{}' in stub model path", label))
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let Some(class_id) = self.class_id else {
            return Ok(Vec::new());
        };
        let (w, h) = (frame.width as f32, frame.height as f32);
        Ok(vec![Detection {
            class_id,
            label: label_for(class_id),
            confidence: STUB_CONFIDENCE,
            bbox: BoundingBox {
                x1: w * 0.25,
                y1: h * 0.25,
                x2: w * 0.75,
                y2: h * 0.75,
            },
        }])
    }
}
