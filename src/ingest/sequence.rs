//! Fixed frame sequence source.

use anyhow::Result;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Replays a fixed list of frames, then signals end-of-stream.
///
/// Frames are rebuilt from a factory on every stream so that each connection sees the
/// same sequence.
pub struct SequenceSource {
    name: String,
    factory: Box<dyn Fn(usize) -> Result<Frame> + Send>,
    len: usize,
    position: usize,
    frame_count: u64,
}

impl SequenceSource {
    pub fn new<F>(name: &str, len: usize, factory: F) -> Self
    where
        F: Fn(usize) -> Result<Frame> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            factory: Box::new(factory),
            len,
            position: 0,
            frame_count: 0,
        }
    }

    /// `count` copies of a solid-color frame.
    pub fn solid(count: usize, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new("sequence://solid", count, move |_| {
            Frame::solid(width, height, rgb)
        })
    }
}

impl FrameSource for SequenceSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SequenceSource: {} ({} frames)", self.name, self.len);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.len {
            return Ok(None);
        }
        let frame = (self.factory)(self.position)?;
        self.position += 1;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn restart(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ends_after_len_frames() -> Result<()> {
        let mut source = SequenceSource::solid(3, 8, 6, [1, 2, 3]);
        source.connect()?;

        for _ in 0..3 {
            let frame = source.next_frame()?.expect("frame");
            assert_eq!((frame.width, frame.height), (8, 6));
        }
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn factory_errors_surface_as_capture_failures() -> Result<()> {
        let mut source = SequenceSource::new("sequence://broken", 2, |index| {
            if index == 1 {
                Err(anyhow::anyhow!("sensor glitch"))
            } else {
                Frame::solid(2, 2, [0, 0, 0])
            }
        });
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
