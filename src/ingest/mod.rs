//! Frame capture sources.
//!
//! This module provides the sources the streamer pulls frames from:
//! - USB/V4L2 devices (feature: capture-v4l2)
//! - Synthetic `stub://` devices (no hardware required)
//! - Fixed frame sequences (tests, embedding callers)
//!
//! A source is opened once at startup. Each `next_frame` call blocks until a frame is
//! available. `Ok(None)` signals end-of-stream and `Err` a capture failure; either one
//! ends the current stream. `restart` prepares the source for the next stream.

mod normalize;
pub mod sequence;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use normalize::{normalize_to_rgb, PixelFormat};
pub use sequence::SequenceSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// Frame width requested from capture devices.
pub const CAPTURE_WIDTH: u32 = 640;
/// Frame height requested from capture devices.
pub const CAPTURE_HEIGHT: u32 = 480;

/// A blocking, pull-based frame producer.
pub trait FrameSource: Send {
    /// Open the underlying device. Failure here is fatal to the process.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame, or `None` once the source has no more frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Prepare for a new stream after the previous one ended.
    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a capture source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Resolve a configured camera string into a device path.
///
/// `"0"` becomes `/dev/video0`; paths and `stub://` URIs pass through unchanged.
pub fn device_path(camera: &str) -> String {
    match camera.trim().parse::<u32>() {
        Ok(index) => format!("/dev/video{index}"),
        Err(_) => camera.trim().to_string(),
    }
}

/// Build an unconnected source for the configured camera.
pub fn open_source(camera: &str) -> Result<Box<dyn FrameSource>> {
    let device = device_path(camera);
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_uri(&device)?));
    }

    #[cfg(feature = "capture-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(device)))
    }
    #[cfg(not(feature = "capture-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "camera '{}' requires the capture-v4l2 feature (use stub:// for a synthetic source)",
            device
        ))
    }
}
