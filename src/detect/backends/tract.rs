#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, YoloParams};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Loads a local model file once and runs it on the CPU for every frame.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    params: YoloParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_params(model_path, YoloParams::default())
    }

    pub fn with_params<P: AsRef<Path>>(model_path: P, params: YoloParams) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        params.input_height as usize,
                        params.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, params })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let data = yolo::preprocess(frame, &self.params)?;
        let input = tract_ndarray::Array4::from_shape_vec(
            (
                1,
                3,
                self.params.input_height as usize,
                self.params.input_width as usize,
            ),
            data,
        )
        .context("failed to shape detector input")?;
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();
        yolo::decode(&values, &shape, &self.params, frame.width, frame.height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::solid(self.params.input_width, self.params.input_height, [114, 114, 114])?;
        self.detect(&blank).map(|_| ())
    }
}
