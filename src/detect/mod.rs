//! Object detection and annotation.
//!
//! `Detector` pairs a `DetectorBackend` with the annotation renderer. The streaming
//! path calls `detect_and_annotate`, which takes a frame by value and returns it with
//! boxes and captions drawn in. One-shot callers use `detect` for structured results.

mod annotate;
mod backend;
mod backends;
mod font;
pub mod labels;
mod result;
pub mod yolo;

use anyhow::Result;

use crate::frame::Frame;

pub use annotate::{annotate, caption, class_color};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, DetectionReport};

pub struct Detector {
    backend: Box<dyn DetectorBackend>,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Open the backend for a configured model path.
    ///
    /// `stub://` paths select the stub backend; anything else is loaded as an ONNX
    /// model (feature: backend-tract).
    pub fn open(model_path: &str) -> Result<Self> {
        if model_path.starts_with("stub://") {
            return Ok(Self::new(StubBackend::from_uri(model_path)?));
        }

        #[cfg(feature = "backend-tract")]
        {
            Ok(Self::new(TractBackend::new(model_path)?))
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            Err(anyhow::anyhow!(
                "model '{}' requires the backend-tract feature (use stub:// for a stub detector)",
                model_path
            ))
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.backend.detect(frame)
    }

    pub fn detect_and_annotate(&mut self, mut frame: Frame) -> Result<Frame> {
        let detections = self.backend.detect(&frame)?;
        if !detections.is_empty() {
            log::trace!("{} detections in {:?}", detections.len(), frame);
        }
        annotate(&mut frame, &detections);
        Ok(frame)
    }
}
