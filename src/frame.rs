//! Frame buffers passed between capture, detection and encoding.
//!
//! A `Frame` is owned by exactly one stage at a time: the capture source creates it,
//! the detector takes it by value and hands back the annotated frame, and the encoder
//! consumes it. `Frame` does not implement `Clone`; a frame never outlives the
//! iteration that produced it.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Bytes per pixel for the RGB8 layout used throughout the pipeline.
pub const CHANNELS: usize = 3;

/// Owned RGB8 frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB8 buffer, validating its length against the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame filled with a single color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let pixels = rgb_len(width, height)? / CHANNELS;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::from_rgb(data, width, height)
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Convert into an `image` buffer without copying.
    pub fn into_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
