//! Synthetic `stub://` source.
//!
//! Generates 640x480 frames with a moving gradient so the whole pipeline can run
//! without a camera. `stub://name?frames=N` ends the stream after N frames.

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats, CAPTURE_HEIGHT, CAPTURE_WIDTH};
use crate::frame::{Frame, CHANNELS};

pub struct SyntheticSource {
    uri: String,
    frame_limit: Option<u64>,
    frame_count: u64,
    stream_frames: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source requires a stub:// uri, got '{}'", uri))?;
        let frame_limit = match rest.split_once('?') {
            Some((_, query)) => parse_frame_limit(query)?,
            None => None,
        };
        Ok(Self {
            uri: uri.to_string(),
            frame_limit,
            frame_count: 0,
            stream_frames: 0,
            connected: false,
        })
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = CAPTURE_WIDTH as usize;
        let height = CAPTURE_HEIGHT as usize;
        let shift = (self.stream_frames * 4) as usize;
        let mut pixels = vec![0u8; width * height * CHANNELS];
        for (i, px) in pixels.chunks_exact_mut(CHANNELS).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y * 255) / height) as u8;
            px[2] = 96;
        }
        pixels
    }
}

fn parse_frame_limit(query: &str) -> Result<Option<u64>> {
    for pair in query.split('&') {
        if let Some(("frames", value)) = pair.split_once('=') {
            let limit = value
                .parse::<u64>()
                .with_context(|| format!("invalid frames value '{}'", value))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.uri));
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.stream_frames >= limit)
        {
            return Ok(None);
        }
        let pixels = self.generate_pixels();
        self.stream_frames += 1;
        self.frame_count += 1;
        Frame::from_rgb(pixels, CAPTURE_WIDTH, CAPTURE_HEIGHT).map(Some)
    }

    fn restart(&mut self) -> Result<()> {
        self.stream_frames = 0;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_produces_capture_sized_frames() -> Result<()> {
        let mut source = SyntheticSource::from_uri("stub://front")?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream_and_restart_rewinds() -> Result<()> {
        let mut source = SyntheticSource::from_uri("stub://front?frames=1")?;
        source.connect()?;

        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());

        source.restart()?;
        assert!(source.next_frame()?.is_some());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn unconnected_source_fails() -> Result<()> {
        let mut source = SyntheticSource::from_uri("stub://front")?;
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn invalid_frame_limit_is_rejected() {
        assert!(SyntheticSource::from_uri("stub://front?frames=many").is_err());
    }
}
