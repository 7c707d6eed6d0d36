//! JPEG encoding of annotated frames.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use crate::frame::Frame;

/// Quality used for every streamed frame.
pub const JPEG_QUALITY: u8 = 80;

/// A compressed frame ready for the wire.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position within the current stream.
    pub sequence: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }
}

impl JpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress a frame. The frame is consumed.
    pub fn encode(&self, frame: Frame, sequence: u64) -> Result<EncodedFrame> {
        if frame.is_empty() {
            return Err(anyhow!(
                "cannot encode empty frame ({}x{})",
                frame.width,
                frame.height
            ));
        }
        let (width, height) = (frame.width, frame.height);
        let image = frame.into_image()?;
        let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
        ImageJpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(&image)
            .context("JPEG encode failed")?;
        Ok(EncodedFrame {
            jpeg,
            width,
            height,
            sequence,
        })
    }
}
